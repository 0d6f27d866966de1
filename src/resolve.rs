use std::path::{Path, PathBuf};

use crate::fs::FileSystem;
use crate::request::{Method, Request};
use crate::status::Status;

/// Resolve //, /./, and /../ in a decoded URL path and drop the leading slash.
///
/// `..` at the top level is discarded, so joining the result onto a directory can never leave it.
pub fn normalize(path: &str) -> PathBuf {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    segments.into_iter().collect()
}

/// What a request resolved to. `path` is set exactly when `status` is OK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub status: Status,
    pub path: Option<PathBuf>,
}

impl Target {
    fn found(path: PathBuf) -> Self {
        Self {
            status: Status::Ok,
            path: Some(path),
        }
    }

    fn error(status: Status) -> Self {
        Self { status, path: None }
    }
}

#[derive(Debug, PartialEq)]
enum EntryKind {
    File,
    Directory,
    Missing,
}

fn entry_kind(fs: &dyn FileSystem, path: &Path) -> EntryKind {
    if !fs.exists(path) {
        EntryKind::Missing
    } else if fs.is_directory(path) {
        EntryKind::Directory
    } else {
        EntryKind::File
    }
}

/// Map a request onto a file below `document_root`.
pub fn resolve(
    request: &Request,
    document_root: &Path,
    index_name: &str,
    fs: &dyn FileSystem,
) -> Target {
    if !matches!(request.method, Method::Get | Method::Head) {
        return Target::error(Status::MethodNotAllowed);
    }
    let candidate = document_root.join(normalize(&request.path));
    match entry_kind(fs, &candidate) {
        EntryKind::File => Target::found(candidate),
        EntryKind::Directory => {
            let index = candidate.join(index_name);
            match entry_kind(fs, &index) {
                EntryKind::File => Target::found(index),
                EntryKind::Directory | EntryKind::Missing => Target::error(Status::NotFound),
            }
        }
        EntryKind::Missing => Target::error(Status::NotFound),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::fs::LocalFileSystem;
    use std::fs::{create_dir, write};
    use tempfile::{tempdir, TempDir};
    use test_case::test_case;

    #[test]
    fn normalize_works() {
        let test_cases = &[
            ("", ""),
            ("/", ""),
            ("/.", ""),
            ("/./", ""),
            ("/.d", ".d"),
            ("//.d", ".d"),
            ("/../", ""),
            ("/abc", "abc"),
            ("/abc/", "abc"),
            ("/abc/.", "abc"),
            ("/abc/..", ""),
            ("/abc/../def", "def"),
            ("/abc/../def/../../", ""),
            ("/a/b/c/../../d/", "a/d"),
            ("/a/b/../../../c", "c"),
            ("/../../etc/passwd", "etc/passwd"),
            ("//a///b////c/////", "a/b/c"),
            ("/a/...", "a/..."),
        ];
        for (url, expected) in test_cases {
            assert_eq!(normalize(url), PathBuf::from(expected), "url: {}", url);
        }
    }

    fn site() -> TempDir {
        let root = tempdir().unwrap();
        write(root.path().join("a.txt"), b"hi").unwrap();
        create_dir(root.path().join("with_index")).unwrap();
        write(root.path().join("with_index").join("index.html"), b"<p>").unwrap();
        create_dir(root.path().join("without_index")).unwrap();
        create_dir(root.path().join("dir_index")).unwrap();
        create_dir(root.path().join("dir_index").join("index.html")).unwrap();
        root
    }

    fn resolve_line(root: &Path, line: &str) -> Target {
        let request = Request::parse(line.as_bytes()).unwrap();
        resolve(&request, root, "index.html", &LocalFileSystem)
    }

    #[test_case("GET /a.txt HTTP/1.1", Status::Ok, Some("a.txt") ; "file")]
    #[test_case("HEAD /a.txt HTTP/1.1", Status::Ok, Some("a.txt") ; "head file")]
    #[test_case("GET /with_index/ HTTP/1.1", Status::Ok, Some("with_index/index.html") ; "index")]
    #[test_case("GET /with_index HTTP/1.1", Status::Ok, Some("with_index/index.html") ; "index without slash")]
    #[test_case("GET / HTTP/1.1", Status::NotFound, None ; "root without index")]
    #[test_case("GET /without_index/ HTTP/1.1", Status::NotFound, None ; "no index")]
    #[test_case("GET /dir_index/ HTTP/1.1", Status::NotFound, None ; "index is a directory")]
    #[test_case("GET /missing.txt HTTP/1.1", Status::NotFound, None ; "missing")]
    #[test_case("GET /a.txt/ HTTP/1.1", Status::Ok, Some("a.txt") ; "trailing slash on file")]
    #[test_case("GET /../../a.txt HTTP/1.1", Status::Ok, Some("a.txt") ; "clamped traversal")]
    #[test_case("POST /a.txt HTTP/1.1", Status::MethodNotAllowed, None ; "post existing")]
    #[test_case("PUT /missing HTTP/1.1", Status::MethodNotAllowed, None ; "put missing")]
    fn resolve_works(line: &str, status: Status, path: Option<&str>) {
        let root = site();
        let target = resolve_line(root.path(), line);
        assert_eq!(target.status, status);
        assert_eq!(target.path, path.map(|path| root.path().join(path)));
    }

    #[test]
    fn resolve_stays_inside_root() {
        let outer = tempdir().unwrap();
        write(outer.path().join("secret.txt"), b"secret").unwrap();
        let root = outer.path().join("www");
        create_dir(&root).unwrap();

        let target = resolve_line(&root, "GET /../secret.txt HTTP/1.1");
        assert_eq!(target.status, Status::NotFound);
        let target = resolve_line(&root, "GET /%2e%2e/secret.txt HTTP/1.1");
        assert_eq!(target.status, Status::NotFound);
    }
}
