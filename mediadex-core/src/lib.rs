//! # Mediadex Core
//!
//! Keeps a metadata index over a tree of media files in step with the disk,
//! resolves next/previous media folders across the tree, and produces
//! thumbnails in the background.
//!
//! ## Overview
//!
//! - **Reconciliation**: [`reconcile::Reconciler`] diffs one directory listing
//!   against the stored [`catalog::MediaRecord`]s and commits inserts,
//!   updates and deletes as one unit of work.
//! - **Navigation**: [`navigation::AdjacentFolderResolver`] walks the tree in
//!   natural name order to the nearest folder holding images, video or audio.
//! - **Thumbnails**: [`thumbs::ThumbnailPipeline`] dedupes jobs per target,
//!   [`thumbs::ThumbnailWorker`]s generate missing derivatives and publish
//!   completion events.
//!
//! [`library::MediaLibrary`] ties the three together behind the operations
//! callers use.
//!
//! ## Feature Flags
//!
//! - `database` (default): PostgreSQL metadata store and Redis-backed
//!   lock, queue and event bus
//! - `ffmpeg`: decode video frames in process instead of running the
//!   `ffmpeg` binary
//! - `integration`: tests that need live PostgreSQL and Redis
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mediadex_core::{
//!     catalog::InMemoryMetadataStore,
//!     fs::LocalFilesystem,
//!     library::MediaLibrary,
//!     navigation::{Direction, PrefixExclusions},
//!     paths::{StorageLayout, VirtualPath},
//!     thumbs::{PipelineBackends, ThumbnailPipeline, ThumbnailSettings},
//! };
//!
//! async fn browse() -> mediadex_core::Result<()> {
//!     let layout = StorageLayout::new("/srv/media", "/srv/cache/thumbnails");
//!     let settings = ThumbnailSettings::default();
//!     let library = MediaLibrary::new(
//!         layout.clone(),
//!         Arc::new(LocalFilesystem::new(layout.media_root())),
//!         Arc::new(InMemoryMetadataStore::new()),
//!         Arc::new(PrefixExclusions::default()),
//!         ThumbnailPipeline::new(PipelineBackends::in_memory(), settings.job_ttl),
//!     );
//!
//!     let dir = VirtualPath::parse("/Holidays/2024")?;
//!     let opened = library.open_directory(&dir).await?;
//!     println!("{} new files", opened.report.inserted);
//!
//!     if let Some(next) = library.find_adjacent(&dir, Direction::Next).await? {
//!         println!("next folder: {next}");
//!     }
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Per-file metadata records and the store port
pub mod catalog;
/// Media type classification by file extension
pub mod classify;
pub mod error;
/// One-level directory listings
pub mod fs;
/// The public operations as one facade
pub mod library;
/// Natural (number-aware) name ordering
pub mod natural;
pub mod navigation;
/// Virtual paths and storage locations
pub mod paths;
pub mod reconcile;
pub mod thumbs;

#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub use error::{MediaError, Result};
pub use paths::{StorageLayout, VirtualPath};
