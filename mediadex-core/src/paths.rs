//! Path model: virtual paths and the storage locations derived from them.
//!
//! A [`VirtualPath`] is the identifier used everywhere else in the crate. It is
//! root-relative, forward-slash separated and always starts with `/`; the
//! library root itself is `/`. Storage locations (the original file and its
//! thumbnail) are pure functions of a virtual path and a [`StorageLayout`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{MediaError, Result};

const THUMBNAIL_SUFFIX: &str = ".jpg";

// A backslash is an ordinary file name character on Unix.
#[cfg(windows)]
const SEPARATORS: &[char] = &['/', '\\'];
#[cfg(not(windows))]
const SEPARATORS: &[char] = &['/'];

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VirtualPath(String);

impl VirtualPath {
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Normalizes `raw` into a virtual path.
    ///
    /// Repeated and trailing slashes collapse and `.` segments are dropped.
    /// Backslashes separate segments only on Windows. `..` segments and NUL bytes are
    /// rejected so a virtual path can never escape the media root.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.contains('\0') {
            return Err(MediaError::InvalidPath {
                path: raw.to_string(),
                reason: "contains NUL byte",
            });
        }

        let mut normalized = String::with_capacity(raw.len() + 1);
        for segment in raw.split(SEPARATORS) {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(MediaError::InvalidPath {
                        path: raw.to_string(),
                        reason: "parent segments are not allowed",
                    });
                }
                name => {
                    normalized.push('/');
                    normalized.push_str(name);
                }
            }
        }

        if normalized.is_empty() {
            normalized.push('/');
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// The path without its leading slash; empty for the root.
    pub fn relative(&self) -> &str {
        &self.0[1..]
    }

    /// Final segment; empty for the root.
    pub fn name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    pub fn parent(&self) -> Option<VirtualPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
        }
    }

    /// Appends a single child name.
    pub fn join(&self, name: &str) -> Result<VirtualPath> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(SEPARATORS)
            || name.contains('\0')
        {
            return Err(MediaError::InvalidPath {
                path: format!("{}/{}", self.0.trim_end_matches('/'), name),
                reason: "child name must be a single segment",
            });
        }
        if self.is_root() {
            Ok(Self(format!("/{name}")))
        } else {
            Ok(Self(format!("{}/{}", self.0, name)))
        }
    }

    /// True when `self` equals `ancestor` or lies beneath it.
    pub fn is_within(&self, ancestor: &VirtualPath) -> bool {
        if ancestor.is_root() || self == ancestor {
            return true;
        }
        self.0
            .strip_prefix(ancestor.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Moves `self` from under `from` to under `to`, or `None` when `self` is
    /// not within `from`.
    pub fn rebase(&self, from: &VirtualPath, to: &VirtualPath) -> Option<VirtualPath> {
        if !self.is_within(from) {
            return None;
        }
        let rest = if from.is_root() {
            self.relative()
        } else {
            self.0[from.0.len()..].trim_start_matches('/')
        };
        if rest.is_empty() {
            return Some(to.clone());
        }
        VirtualPath::parse(&format!("{}/{}", to.as_str(), rest)).ok()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.relative().split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VirtualPath {
    type Error = MediaError;

    fn try_from(value: String) -> Result<Self> {
        VirtualPath::parse(&value)
    }
}

impl TryFrom<&str> for VirtualPath {
    type Error = MediaError;

    fn try_from(value: &str) -> Result<Self> {
        VirtualPath::parse(value)
    }
}

impl From<VirtualPath> for String {
    fn from(value: VirtualPath) -> Self {
        value.0
    }
}

impl AsRef<str> for VirtualPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where originals live and where their derivatives are written.
#[derive(Clone, Debug)]
pub struct StorageLayout {
    media_root: PathBuf,
    thumbnail_root: PathBuf,
}

impl StorageLayout {
    pub fn new(media_root: impl Into<PathBuf>, thumbnail_root: impl Into<PathBuf>) -> Self {
        Self {
            media_root: media_root.into(),
            thumbnail_root: thumbnail_root.into(),
        }
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn thumbnail_root(&self) -> &Path {
        &self.thumbnail_root
    }

    pub fn original_path(&self, path: &VirtualPath) -> PathBuf {
        let mut out = self.media_root.clone();
        for segment in path.segments() {
            out.push(segment);
        }
        out
    }

    /// Thumbnail location for a source file. The source extension is kept so
    /// `a.png` and `a.jpg` in one folder never collide.
    pub fn thumbnail_path(&self, path: &VirtualPath) -> PathBuf {
        let mut out = self.thumbnail_root.clone();
        let mut segments = path.segments().peekable();
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                out.push(format!("{segment}{THUMBNAIL_SUFFIX}"));
            } else {
                out.push(segment);
            }
        }
        out
    }

    /// Inverse of [`StorageLayout::original_path`] for paths under the media root.
    pub fn virtual_path_of(&self, original: &Path) -> Result<VirtualPath> {
        let rest = original
            .strip_prefix(&self.media_root)
            .map_err(|_| MediaError::InvalidPath {
                path: original.display().to_string(),
                reason: "outside the media root",
            })?;

        let mut out = VirtualPath::root();
        for component in rest.components() {
            match component {
                Component::Normal(name) => {
                    let name = name.to_str().ok_or_else(|| MediaError::InvalidPath {
                        path: original.display().to_string(),
                        reason: "not valid UTF-8",
                    })?;
                    out = out.join(name)?;
                }
                Component::CurDir => continue,
                _ => {
                    return Err(MediaError::InvalidPath {
                        path: original.display().to_string(),
                        reason: "unsupported path component",
                    });
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vp(raw: &str) -> VirtualPath {
        VirtualPath::parse(raw).unwrap()
    }

    #[test]
    fn parse_normalizes_separators() {
        assert_eq!(vp("").as_str(), "/");
        assert_eq!(vp("/").as_str(), "/");
        assert_eq!(vp("A/B").as_str(), "/A/B");
        assert_eq!(vp("//A///B/").as_str(), "/A/B");
        assert_eq!(vp("/A/./B").as_str(), "/A/B");
    }

    #[cfg(unix)]
    #[test]
    fn backslash_is_part_of_a_name() {
        let path = vp("/d/a\\b.jpg");
        assert_eq!(path.name(), "a\\b.jpg");
        assert_eq!(path.parent(), Some(vp("/d")));
        assert_eq!(vp("/d").join("a\\b.jpg").unwrap(), path);
        assert_eq!(
            StorageLayout::new("/m", "/t").original_path(&path),
            PathBuf::from("/m/d/a\\b.jpg")
        );
    }

    #[test]
    fn parse_rejects_traversal() {
        assert!(VirtualPath::parse("/A/../etc").is_err());
        assert!(VirtualPath::parse("..").is_err());
        assert!(VirtualPath::parse("/A\0B").is_err());
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(vp("/A/B/c.jpg").parent(), Some(vp("/A/B")));
        assert_eq!(vp("/A").parent(), Some(VirtualPath::root()));
        assert_eq!(VirtualPath::root().parent(), None);
        assert_eq!(vp("/A/B/c.jpg").name(), "c.jpg");
        assert_eq!(VirtualPath::root().name(), "");
    }

    #[test]
    fn join_rejects_multi_segment_names() {
        assert_eq!(VirtualPath::root().join("A").unwrap(), vp("/A"));
        assert_eq!(vp("/A").join("b.png").unwrap(), vp("/A/b.png"));
        assert!(vp("/A").join("b/c").is_err());
        assert!(vp("/A").join("..").is_err());
    }

    #[test]
    fn within_respects_segment_boundaries() {
        assert!(vp("/A/B").is_within(&vp("/A")));
        assert!(vp("/A").is_within(&vp("/A")));
        assert!(vp("/A").is_within(&VirtualPath::root()));
        assert!(!vp("/AB").is_within(&vp("/A")));
    }

    #[test]
    fn rebase_moves_subtree() {
        assert_eq!(vp("/A/x/1.jpg").rebase(&vp("/A"), &vp("/B")), Some(vp("/B/x/1.jpg")));
        assert_eq!(vp("/A").rebase(&vp("/A"), &vp("/C/D")), Some(vp("/C/D")));
        assert_eq!(vp("/AB/1.jpg").rebase(&vp("/A"), &vp("/B")), None);
    }

    #[test]
    fn layout_derives_locations() {
        let layout = StorageLayout::new("/srv/media", "/var/cache/thumbs");
        let path = vp("/Trips/2024/beach.png");
        assert_eq!(
            layout.original_path(&path),
            PathBuf::from("/srv/media/Trips/2024/beach.png")
        );
        assert_eq!(
            layout.thumbnail_path(&path),
            PathBuf::from("/var/cache/thumbs/Trips/2024/beach.png.jpg")
        );
        assert_eq!(
            layout.virtual_path_of(Path::new("/srv/media/Trips/2024/beach.png")).unwrap(),
            path
        );
        assert!(layout.virtual_path_of(Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn serde_goes_through_parse() {
        let parsed: VirtualPath = serde_json::from_str("\"A//b.jpg\"").unwrap();
        assert_eq!(parsed.as_str(), "/A/b.jpg");
        assert!(serde_json::from_str::<VirtualPath>("\"/../x\"").is_err());
    }
}
