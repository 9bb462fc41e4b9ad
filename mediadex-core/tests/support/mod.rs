#![allow(dead_code)]

use async_trait::async_trait;
use mediadex_core::thumbs::ThumbnailEncoder;
use mediadex_core::{MediaError, Result, VirtualPath};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn vp(raw: &str) -> VirtualPath {
    VirtualPath::parse(raw).unwrap()
}

/// Writes a placeholder derivative and counts calls. Sources whose file name
/// contains `broken` fail; `panic` panics.
#[derive(Debug, Default)]
pub struct CountingEncoder {
    images: AtomicUsize,
    videos: AtomicUsize,
    seen: parking_lot::Mutex<Vec<PathBuf>>,
}

impl CountingEncoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.images.load(Ordering::SeqCst) + self.videos.load(Ordering::SeqCst)
    }

    pub fn video_calls(&self) -> usize {
        self.videos.load(Ordering::SeqCst)
    }

    pub fn sources(&self) -> Vec<PathBuf> {
        self.seen.lock().clone()
    }

    async fn write(&self, src: &Path, dst: &Path) -> Result<()> {
        self.seen.lock().push(src.to_path_buf());
        let name = src
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if name.contains("panic") {
            panic!("encoder exploded on {name}");
        }
        if name.contains("broken") {
            return Err(MediaError::Encode {
                path: name,
                reason: "fixture failure".into(),
            });
        }
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dst, b"thumb").await?;
        Ok(())
    }
}

#[async_trait]
impl ThumbnailEncoder for CountingEncoder {
    async fn encode_image(&self, src: &Path, dst: &Path) -> Result<()> {
        self.images.fetch_add(1, Ordering::SeqCst);
        self.write(src, dst).await
    }

    async fn extract_video_frame(&self, src: &Path, dst: &Path) -> Result<()> {
        self.videos.fetch_add(1, Ordering::SeqCst);
        self.write(src, dst).await
    }
}
