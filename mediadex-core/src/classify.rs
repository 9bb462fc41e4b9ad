use serde::{Deserialize, Serialize};
use std::fmt;

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "tif", "tiff", "avif", "heic", "heif", "ico",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mkv", "webm", "mov", "avi", "wmv", "flv", "mpg", "mpeg", "3gp", "ogv", "ts",
    "mts", "m2ts",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "wav", "ogg", "oga", "opus", "m4a", "aac", "wma", "aiff", "aif", "alac",
];

/// Closed set of node kinds the rest of the crate reasons about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Directory,
    Image,
    Video,
    Audio,
    Other,
}

impl MediaKind {
    /// Classifies a file by the extension of its name. Matching is
    /// case-insensitive; names without an extension are [`MediaKind::Other`].
    pub fn from_file_name(name: &str) -> Self {
        let Some((stem, ext)) = name.rsplit_once('.') else {
            return MediaKind::Other;
        };
        // ".jpg" is a hidden file named jpg, not a jpeg
        if stem.is_empty() {
            return MediaKind::Other;
        }
        let ext = ext.to_ascii_lowercase();
        let ext = ext.as_str();

        if IMAGE_EXTENSIONS.contains(&ext) {
            MediaKind::Image
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            MediaKind::Video
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            MediaKind::Audio
        } else {
            MediaKind::Other
        }
    }

    /// Image, video or audio: the kinds that make a folder media-bearing.
    pub fn is_media(self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Video | MediaKind::Audio)
    }

    /// Kinds the thumbnail pipeline produces derivatives for.
    pub fn is_thumbnailable(self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Video)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Directory => write!(f, "directory"),
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Other => write!(f, "other"),
        }
    }
}
