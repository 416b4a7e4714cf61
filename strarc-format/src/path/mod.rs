use std::{
    fmt,
    path::{Path, PathBuf},
};

mod error;

pub use self::error::IntoArchivePathError;

#[cfg(not(windows))]
/// The platform-specific separator as a string, used for printing
/// `ArchivePath`s in the platform-preferred manner.
pub const PATH_PLATFORM_SEP: &str = "/";

#[cfg(windows)]
/// The platform-specific separator as a string, used for printing
/// `ArchivePath`s in the platform-preferred manner.
pub const PATH_PLATFORM_SEP: &str = "\\";

/// The separator used between components of an `ArchivePath` and in the
/// names stored in file entry markers.
pub const PATH_ARCHIVE_SEP: &str = "\\";

/// Name of the root of a backup or restore operation.
pub const ROOT: &str = ".";

/// A path relative to the root of an operation, in archive form.
#[derive(Debug, Clone, PartialOrd, Ord, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ArchivePath(String);

/// Splits on both separators, dropping empty and `.` components. A `..`
/// component is refused rather than resolved.
pub fn sanitize(path: &str) -> Result<Vec<&str>, IntoArchivePathError> {
    let mut out = vec![];

    for (index, component) in path.split(|c| c == '/' || c == '\\').enumerate() {
        match component {
            "" | "." => {}
            ".." => return Err(IntoArchivePathError::NonCanonical),
            // Drive prefixes of absolute paths are dropped like a leading separator.
            c if index == 0 && c.len() == 2 && c.ends_with(':') => {}
            c if c.contains('\0') => return Err(IntoArchivePathError::UnrepresentableStr),
            c => out.push(c),
        }
    }

    Ok(out)
}

impl ArchivePath {
    pub fn new(path: &str) -> Result<ArchivePath, IntoArchivePathError> {
        if path.is_empty() {
            return Err(IntoArchivePathError::EmptyPath);
        }

        let out = sanitize(path)?;
        if out.is_empty() {
            return Ok(ArchivePath::root());
        }

        Ok(ArchivePath(out.join(PATH_ARCHIVE_SEP)))
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<ArchivePath, IntoArchivePathError> {
        let path = path
            .as_ref()
            .to_str()
            .ok_or(IntoArchivePathError::UnrepresentableStr)?;
        ArchivePath::new(path)
    }

    /// Decodes the UTF-16LE name of a file entry marker.
    pub fn from_utf16le(bytes: &[u8]) -> Result<ArchivePath, IntoArchivePathError> {
        let name = crate::de::decode_utf16le(bytes).ok_or(IntoArchivePathError::InvalidUtf16)?;
        ArchivePath::new(&name)
    }

    pub(crate) fn from_raw(raw: String) -> ArchivePath {
        ArchivePath(raw)
    }

    pub fn root() -> ArchivePath {
        ArchivePath(ROOT.to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    /// The archive form, components separated by `\`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn to_utf16le(&self) -> Vec<u8> {
        crate::ser::encode_utf16le(&self.0)
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.iter().collect()
    }

    pub fn parent(&self) -> Option<ArchivePath> {
        if self.is_root() {
            return None;
        }

        match self.0.rfind(PATH_ARCHIVE_SEP) {
            Some(index) => Some(ArchivePath(self.0[..index].to_string())),
            None => Some(ArchivePath::root()),
        }
    }

    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.iter().last()
    }

    pub fn depth(&self) -> usize {
        self.iter().count()
    }

    pub fn join(&self, tail: &str) -> Result<ArchivePath, IntoArchivePathError> {
        if self.is_root() {
            return ArchivePath::new(tail);
        }
        ArchivePath::new(&format!("{}{}{}", self.0, PATH_ARCHIVE_SEP, tail))
    }

    pub fn with_file_name(&self, name: &str) -> Result<ArchivePath, IntoArchivePathError> {
        match self.parent() {
            Some(parent) => parent.join(name),
            None => ArchivePath::new(name),
        }
    }

    /// Components of the path; empty for the root.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0
            .split(PATH_ARCHIVE_SEP)
            .filter(|component| *component != ROOT)
    }
}

impl fmt::Display for ArchivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(ROOT);
        }

        let mut iter = self.0.split(PATH_ARCHIVE_SEP);
        if let Some(v) = iter.next() {
            f.write_str(v)?;
        }
        for v in iter {
            f.write_str(PATH_PLATFORM_SEP)?;
            f.write_str(v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitisation() {
        let path = ArchivePath::new("/something/somethingelse/./foo.txt").unwrap();
        assert_eq!(path.as_str(), "something\\somethingelse\\foo.txt");

        let path = ArchivePath::new(r"C:\Users\me\notes.txt").unwrap();
        assert_eq!(path.as_str(), "Users\\me\\notes.txt");

        let path = ArchivePath::new("mixed/separators\\here/").unwrap();
        assert_eq!(path.as_str(), "mixed\\separators\\here");
    }

    #[test]
    fn parent_components_are_refused() {
        assert_eq!(
            ArchivePath::new("../escape.txt"),
            Err(IntoArchivePathError::NonCanonical)
        );
        assert_eq!(
            ArchivePath::new(r"dir\..\..\etc\passwd"),
            Err(IntoArchivePathError::NonCanonical)
        );
    }

    #[test]
    fn nul_and_empty() {
        assert_eq!(
            ArchivePath::new("a\0b"),
            Err(IntoArchivePathError::UnrepresentableStr)
        );
        assert_eq!(ArchivePath::new(""), Err(IntoArchivePathError::EmptyPath));
    }

    #[test]
    fn root_forms() {
        assert!(ArchivePath::new(".").unwrap().is_root());
        assert!(ArchivePath::new("./").unwrap().is_root());
        assert!(ArchivePath::new("/").unwrap().is_root());

        let root = ArchivePath::root();
        assert_eq!(root.parent(), None);
        assert_eq!(root.file_name(), None);
        assert_eq!(root.depth(), 0);
        assert_eq!(root.to_path_buf(), PathBuf::new());
        assert_eq!(root.join("child").unwrap().as_str(), "child");
    }

    #[test]
    fn navigation() {
        let path = ArchivePath::new("a/b/c.txt").unwrap();
        assert_eq!(path.file_name(), Some("c.txt"));
        assert_eq!(path.parent().unwrap().as_str(), "a\\b");
        assert!(ArchivePath::new("a").unwrap().parent().unwrap().is_root());
        assert_eq!(path.with_file_name("C~1.TXT").unwrap().as_str(), "a\\b\\C~1.TXT");
        assert_eq!(path.depth(), 3);
        assert_eq!(path.to_path_buf(), ["a", "b", "c.txt"].iter().collect::<PathBuf>());
        assert!(path.join("..").is_err());
    }

    #[test]
    fn utf16_names() {
        let path = ArchivePath::new("dir/🧊.txt").unwrap();
        let encoded = path.to_utf16le();
        assert_eq!(encoded.len() % 2, 0);
        assert_eq!(ArchivePath::from_utf16le(&encoded).unwrap(), path);

        // A lone high surrogate
        assert_eq!(
            ArchivePath::from_utf16le(&[0x00, 0xD8]),
            Err(IntoArchivePathError::InvalidUtf16)
        );
    }
}
