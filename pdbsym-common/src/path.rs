use std::path::{Component, Path, PathBuf};

/// Returns `true` if the given character is any valid directory separator.
#[inline]
fn is_path_separator(c: u8) -> bool {
    matches!(c, b'\\' | b'/')
}

/// Splits off the last component of a path.
///
/// Crash logs and CodeView records frequently carry Windows paths, even when the tool runs on a
/// Unix host. Both `\` and `/` are therefore treated as separators, regardless of the platform.
/// Trailing separators are ignored.
///
/// # Examples
///
/// ```
/// assert_eq!(pdbsym_common::split_path("/a/b/c"), (Some("/a/b"), "c"));
/// assert_eq!(pdbsym_common::split_path("C:\\a\\b"), (Some("C:\\a"), "b"));
/// assert_eq!(pdbsym_common::split_path("mylib.pdb"), (None, "mylib.pdb"));
/// ```
pub fn split_path(path: &str) -> (Option<&str>, &str) {
    let bytes = path.as_bytes();
    let path = match bytes.iter().rposition(|&c| !is_path_separator(c)) {
        Some(cutoff) => &path[..=cutoff],
        None => path,
    };

    // Separators are ASCII, so every split position is a char boundary.
    match path.bytes().rposition(is_path_separator) {
        Some(0) => (Some(&path[..1]), &path[1..]),
        Some(pos) => (Some(&path[..pos]), &path[pos + 1..]),
        None => (None, path),
    }
}

/// Returns the file name component of a path in either Windows or Unix notation.
///
/// ```
/// assert_eq!(pdbsym_common::file_name("D:\\build\\out\\mylib.pdb"), "mylib.pdb");
/// ```
pub fn file_name(path: &str) -> &str {
    split_path(path).1
}

/// Normalizes a path lexically, resolving it against `root` if it is relative.
///
/// `.` components are dropped and `..` components pop the previous component. The file system is
/// never consulted, so this works for paths that do not exist yet, such as cache directories that
/// are about to be created.
///
/// ```
/// use std::path::Path;
///
/// let path = pdbsym_common::normalize_path(Path::new("/etc/pdbsym"), Path::new("../cache/./x"));
/// assert_eq!(path, Path::new("/etc/cache/x"));
/// ```
pub fn normalize_path(root: &Path, path: &Path) -> PathBuf {
    let joined;
    let path = if path.is_absolute() {
        path
    } else {
        joined = root.join(path);
        &joined
    };

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }

    normalized
}

/// Returns the path with its extension replaced by a lowercase `pdb`.
///
/// Loaded PDBs are keyed by this form so that `A.PDB` and `A.pdb` map to the same module. The path
/// is also normalized lexically, see [`normalize_path`]. Returns `None` if the path does not carry
/// a `.pdb` extension in any casing.
///
/// ```
/// use std::path::Path;
///
/// let key = pdbsym_common::pdb_key(Path::new("/sym/x/../MYLIB.PDB")).unwrap();
/// assert_eq!(key, Path::new("/sym/MYLIB.pdb"));
/// assert!(pdbsym_common::pdb_key(Path::new("/sym/mylib.dll")).is_none());
/// ```
pub fn pdb_key(path: &Path) -> Option<PathBuf> {
    let extension = path.extension()?.to_str()?;
    if !extension.eq_ignore_ascii_case("pdb") {
        return None;
    }

    Some(normalize_path(Path::new(""), path).with_extension("pdb"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_split_path_trailing_separator() {
        assert_eq!(split_path("/a/b/"), (Some("/a"), "b"));
        assert_eq!(split_path("\\\\server\\share\\x.pdb"), (Some("\\\\server\\share"), "x.pdb"));
    }

    #[test]
    fn test_split_path_root() {
        assert_eq!(split_path("/a"), (Some("/"), "a"));
    }

    #[test]
    fn test_split_path_mixed_separators() {
        assert_eq!(file_name("C:/build\\x64/mylib.pdb"), "mylib.pdb");
    }

    #[test]
    fn test_normalize_absolute_is_kept() {
        let path = normalize_path(Path::new("/root"), Path::new("/abs/./dir"));
        assert_eq!(path, Path::new("/abs/dir"));
    }

    #[test]
    fn test_normalize_relative() {
        let path = normalize_path(Path::new("/cfg/dir"), Path::new("sym/../cache"));
        assert_eq!(path, Path::new("/cfg/dir/cache"));
    }

    #[test]
    fn test_pdb_key_mixed_case() {
        assert_eq!(
            pdb_key(Path::new("x/Foo.Pdb")),
            Some(PathBuf::from("x/Foo.pdb"))
        );
        assert_eq!(pdb_key(Path::new("x/Foo")), None);
    }

    #[test]
    fn test_pdb_key_dot_components() {
        let key = pdb_key(Path::new("/sym/mylib.pdb"));
        assert_eq!(pdb_key(Path::new("/sym/a/../mylib.PDB")), key);
        assert_eq!(pdb_key(Path::new("/sym/./mylib.pdb")), key);
        assert_eq!(key, Some(PathBuf::from("/sym/mylib.pdb")));
    }
}
