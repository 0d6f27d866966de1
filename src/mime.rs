use std::collections::HashMap;
use std::fs::File;
use std::io::BufRead;
use std::path::Path;

use crate::config::DEFAULT_MIME_TYPE;

// Same layout as a mime.types file: a type followed by its extensions.
const DEFAULT_EXTENSIONS_MAP: &[&str] = &[
    "application/json        json",
    "application/ogg         ogg",
    "application/pdf         pdf",
    "application/wasm        wasm",
    "application/xml         xsl xml",
    "application/zip         zip",
    "audio/mpeg              mp2 mp3 mpga",
    "image/gif               gif",
    "image/jpeg              jpeg jpe jpg",
    "image/png               png",
    "image/svg+xml           svg",
    "image/x-icon            ico",
    "text/css                css",
    "text/html               html htm",
    "text/javascript         js",
    "text/plain              txt asc",
    "video/mpeg              mpeg mpe mpg",
    "video/quicktime         qt mov",
    "video/x-msvideo         avi",
    "video/mp4               mp4",
];

/// Extension to content type table.
#[derive(Debug, Clone)]
pub struct MimeMap {
    mimetypes: HashMap<String, String>,
    default_mimetype: String,
}

impl MimeMap {
    /// Built-in table with the given fallback type.
    pub fn with_default(default_mimetype: &str) -> Self {
        let mut mime_map = Self {
            mimetypes: HashMap::new(),
            default_mimetype: default_mimetype.to_string(),
        };
        for line in DEFAULT_EXTENSIONS_MAP {
            mime_map.add_mimetype_line(line);
        }
        mime_map
    }

    /// Add extension map from a file. Entries override the built-in ones.
    pub fn load_file(&mut self, filename: &Path) -> std::io::Result<()> {
        let file = File::open(filename)?;
        for line in std::io::BufReader::new(file).lines() {
            self.add_mimetype_line(&line?);
        }
        Ok(())
    }

    /// Add line from an extension map.
    fn add_mimetype_line(&mut self, line: &str) {
        let mut fields = line.split_ascii_whitespace();
        let mimetype = match fields.next() {
            Some(mimetype) => mimetype,
            None => return, // empty line
        };
        if mimetype.starts_with('#') {
            return; // comment
        }
        for extension in fields {
            self.mimetypes
                .insert(extension.to_ascii_lowercase(), mimetype.to_string());
        }
    }

    /// Content type for an extension, if it is known.
    pub fn lookup(&self, extension: &str) -> Option<&str> {
        self.mimetypes
            .get(&extension.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Content type for a file, falling back to the default type.
    pub fn content_type(&self, path: &Path) -> &str {
        path.extension()
            .and_then(|extension| extension.to_str())
            .and_then(|extension| self.lookup(extension))
            .unwrap_or(&self.default_mimetype)
    }
}

impl Default for MimeMap {
    fn default() -> Self {
        Self::with_default(DEFAULT_MIME_TYPE)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_case::test_case;

    #[test_case("a.html", "text/html" ; "html")]
    #[test_case("dir/b.TXT", "text/plain" ; "uppercase extension")]
    #[test_case("c.tar.zip", "application/zip" ; "last extension wins")]
    #[test_case("d.unknown", "application/octet-stream" ; "unknown extension")]
    #[test_case("Makefile", "application/octet-stream" ; "no extension")]
    fn content_type_works(path: &str, expected: &str) {
        assert_eq!(MimeMap::default().content_type(Path::new(path)), expected);
    }

    #[test]
    fn lookup_has_no_fallback() {
        let mime_map = MimeMap::default();
        assert_eq!(mime_map.lookup("png"), Some("image/png"));
        assert_eq!(mime_map.lookup("nope"), None);
    }

    #[test]
    fn load_file_works() {
        let mut file = NamedTempFile::new().unwrap();
        for line in &[
            "test/type1 a1",
            "test/this-gets-replaced  ap2",
            "# this is a comment",
            "test/type3\tapp3\r",
            "test/type2  ap2",
            "  test/foo foo",
            "text/x-custom html",
            "",
        ] {
            writeln!(file, "{}", line).unwrap();
        }
        let mut mime_map = MimeMap::with_default("test/default");
        mime_map.load_file(file.path()).unwrap();
        assert_eq!(mime_map.content_type(Path::new("f.a1")), "test/type1");
        assert_eq!(mime_map.content_type(Path::new("f.ap2")), "test/type2");
        assert_eq!(mime_map.content_type(Path::new("f.app3")), "test/type3");
        assert_eq!(mime_map.content_type(Path::new("f.foo")), "test/foo");
        assert_eq!(mime_map.content_type(Path::new("f.html")), "text/x-custom");
        assert_eq!(mime_map.content_type(Path::new("f.appp4")), "test/default");
    }
}
