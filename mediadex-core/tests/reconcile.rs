mod support;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mediadex_core::catalog::{ChangeSet, InMemoryMetadataStore, MediaRecord, MetadataStore};
use mediadex_core::fs::{LocalFilesystem, normalize_mtime};
use mediadex_core::reconcile::Reconciler;
use mediadex_core::{MediaError, Result, VirtualPath};
use std::collections::{BTreeSet, HashMap};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use support::vp;
use tempfile::TempDir;
use uuid::Uuid;

fn touch(path: &Path, modified: SystemTime) {
    let file = OpenOptions::new().write(true).open(path).unwrap();
    file.set_modified(modified).unwrap();
}

fn write_file(path: &Path, bytes: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, bytes).unwrap();
}

fn fixture() -> (TempDir, Arc<InMemoryMetadataStore>, Reconciler) {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(InMemoryMetadataStore::new());
    let reconciler = Reconciler::new(
        Arc::new(LocalFilesystem::new(root.path())),
        Arc::clone(&store) as Arc<dyn MetadataStore>,
    );
    (root, store, reconciler)
}

fn disk_mtime(path: &Path) -> DateTime<Utc> {
    normalize_mtime(std::fs::metadata(path).unwrap().modified().unwrap().into())
}

async fn record_paths(store: &InMemoryMetadataStore, dir: &VirtualPath) -> BTreeSet<String> {
    store
        .list_records(dir)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.path.to_string())
        .collect()
}

#[tokio::test]
async fn records_converge_on_disk_contents() {
    let (root, store, reconciler) = fixture();
    let album = root.path().join("album");
    write_file(&album.join("a.jpg"), b"aaaa");
    write_file(&album.join("b.png"), b"bb");
    write_file(&album.join("notes.txt"), b"n");
    write_file(&album.join("sub/c.jpg"), b"c");

    let dir = vp("/album");
    let first = reconciler.reconcile(&dir).await.unwrap();
    assert_eq!(first.inserted, 3);
    assert_eq!(
        record_paths(&store, &dir).await,
        BTreeSet::from(["/album/a.jpg".into(), "/album/b.png".into(), "/album/notes.txt".into()])
    );
    assert!(record_paths(&store, &vp("/album/sub")).await.is_empty());

    std::fs::remove_file(album.join("b.png")).unwrap();
    write_file(&album.join("d.mp4"), b"dddddd");
    std::fs::write(album.join("a.jpg"), b"aaaaaaaa").unwrap();
    touch(&album.join("a.jpg"), SystemTime::now() + Duration::from_secs(30));

    let second = reconciler.reconcile(&dir).await.unwrap();
    assert_eq!((second.inserted, second.updated, second.deleted), (1, 1, 1));

    let records = store.list_records(&dir).await.unwrap();
    assert_eq!(
        records.iter().map(|r| r.path.to_string()).collect::<BTreeSet<_>>(),
        BTreeSet::from(["/album/a.jpg".into(), "/album/d.mp4".into(), "/album/notes.txt".into()])
    );
    for record in &records {
        let on_disk = album.join(record.path.name());
        assert_eq!(record.file_modified_at, disk_mtime(&on_disk), "{}", record.path);
        assert_eq!(record.file_size, std::fs::metadata(&on_disk).unwrap().len());
        assert_eq!(record.dir_path, dir);
    }
}

#[tokio::test]
async fn second_pass_without_changes_is_a_noop() {
    let (root, store, reconciler) = fixture();
    write_file(&root.path().join("x/1.jpg"), b"1");
    write_file(&root.path().join("x/2.jpg"), b"2");

    let dir = vp("/x");
    assert!(!reconciler.reconcile(&dir).await.unwrap().is_noop());
    let commits = store.commit_count();

    let again = reconciler.reconcile(&dir).await.unwrap();
    assert!(again.is_noop());
    assert_eq!(store.commit_count(), commits, "an empty change set must not be written");
}

#[tokio::test]
async fn update_keeps_user_title() {
    let (root, store, reconciler) = fixture();
    let file = root.path().join("x/photo.jpg");
    write_file(&file, b"1");

    let dir = vp("/x");
    reconciler.reconcile(&dir).await.unwrap();
    let path = vp("/x/photo.jpg");
    assert_eq!(store.get_record(&path).await.unwrap().unwrap().title, "photo.jpg");
    assert!(store.set_title(&path, "Sunset").await.unwrap());

    touch(&file, SystemTime::now() + Duration::from_secs(60));
    let report = reconciler.reconcile(&dir).await.unwrap();
    assert_eq!(report.updated, 1);

    let record = store.get_record(&path).await.unwrap().unwrap();
    assert_eq!(record.title, "Sunset");
    assert_eq!(record.file_modified_at, disk_mtime(&file));
}

#[tokio::test]
async fn vanished_directory_removes_its_records() {
    let (root, store, reconciler) = fixture();
    write_file(&root.path().join("gone/1.jpg"), b"1");
    write_file(&root.path().join("gone/2.jpg"), b"2");

    let dir = vp("/gone");
    reconciler.reconcile(&dir).await.unwrap();
    std::fs::remove_dir_all(root.path().join("gone")).unwrap();

    let report = reconciler.reconcile(&dir).await.unwrap();
    assert_eq!(report.deleted, 2);
    assert!(store.is_empty());
}

#[tokio::test]
async fn reconciling_a_file_is_an_error() {
    let (root, _store, reconciler) = fixture();
    File::create(root.path().join("plain.jpg")).unwrap();

    let err = reconciler.reconcile(&vp("/plain.jpg")).await.unwrap_err();
    assert!(matches!(err, MediaError::NotADirectory(_)));
}

#[tokio::test]
async fn different_directories_reconcile_concurrently() {
    let (root, store, reconciler) = fixture();
    for dir in ["a", "b", "c"] {
        for i in 0..5 {
            write_file(&root.path().join(format!("{dir}/{i}.jpg")), b"x");
        }
    }

    let (a, b, c) = (vp("/a"), vp("/b"), vp("/c"));
    let (ra, rb, rc) = tokio::join!(
        reconciler.reconcile(&a),
        reconciler.reconcile(&b),
        reconciler.reconcile(&c)
    );
    assert_eq!(ra.unwrap().inserted + rb.unwrap().inserted + rc.unwrap().inserted, 15);
    assert_eq!(store.len(), 15);
}

#[tokio::test]
async fn same_directory_reconciles_concurrently() {
    let (root, store, reconciler) = fixture();
    let album = root.path().join("album");
    for name in ["1.jpg", "2.jpg", "3.jpg"] {
        write_file(&album.join(name), b"x");
    }

    let dir = vp("/album");
    reconciler.reconcile(&dir).await.unwrap();
    let ids: HashMap<String, Uuid> = store
        .list_records(&dir)
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.path.to_string(), r.id))
        .collect();

    std::fs::remove_file(album.join("2.jpg")).unwrap();
    write_file(&album.join("4.jpg"), b"y");

    let (first, second) = tokio::join!(reconciler.reconcile(&dir), reconciler.reconcile(&dir));
    first.unwrap();
    second.unwrap();

    let records = store.list_records(&dir).await.unwrap();
    assert_eq!(
        records.iter().map(|r| r.path.to_string()).collect::<Vec<_>>(),
        ["/album/1.jpg", "/album/3.jpg", "/album/4.jpg"]
    );
    for record in &records {
        if let Some(id) = ids.get(record.path.as_str()) {
            assert_eq!(&record.id, id, "{} changed identity", record.path);
        }
    }

    assert!(reconciler.reconcile(&dir).await.unwrap().is_noop());
}

#[cfg(unix)]
#[tokio::test]
async fn backslash_in_a_file_name_gets_a_record() {
    let (root, store, reconciler) = fixture();
    write_file(&root.path().join("d/a\\b.jpg"), b"1");

    let dir = vp("/d");
    let report = reconciler.reconcile(&dir).await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(
        record_paths(&store, &dir).await,
        BTreeSet::from(["/d/a\\b.jpg".to_string()])
    );
    assert!(reconciler.reconcile(&dir).await.unwrap().is_noop());
}

/// Reads through to an inner store but refuses every commit.
struct FailingStore {
    inner: InMemoryMetadataStore,
}

#[async_trait]
impl MetadataStore for FailingStore {
    async fn list_records(&self, dir: &VirtualPath) -> Result<Vec<MediaRecord>> {
        self.inner.list_records(dir).await
    }

    async fn get_record(&self, path: &VirtualPath) -> Result<Option<MediaRecord>> {
        self.inner.get_record(path).await
    }

    async fn commit(&self, _changes: &ChangeSet) -> Result<()> {
        Err(MediaError::Internal("store unavailable".into()))
    }

    async fn set_title(&self, path: &VirtualPath, title: &str) -> Result<bool> {
        self.inner.set_title(path, title).await
    }

    async fn rewrite_prefix(&self, from: &VirtualPath, to: &VirtualPath) -> Result<u64> {
        self.inner.rewrite_prefix(from, to).await
    }
}

#[tokio::test]
async fn store_failure_is_surfaced_and_nothing_is_written() {
    let root = tempfile::tempdir().unwrap();
    write_file(&root.path().join("x/1.jpg"), b"1");
    let store = Arc::new(FailingStore {
        inner: InMemoryMetadataStore::new(),
    });
    let reconciler = Reconciler::new(
        Arc::new(LocalFilesystem::new(root.path())),
        Arc::clone(&store) as Arc<dyn MetadataStore>,
    );

    let err = reconciler.reconcile(&vp("/x")).await.unwrap_err();
    assert!(matches!(err, MediaError::Internal(_)));
    assert!(store.inner.is_empty());
}
