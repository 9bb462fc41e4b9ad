mod support;

use mediadex_core::VirtualPath;
use mediadex_core::fs::InMemoryFs;
use mediadex_core::navigation::{AdjacentFolderResolver, Direction, PrefixExclusions};
use std::sync::Arc;
use support::vp;

fn tree(files: &[&str], dirs: &[&str]) -> Arc<InMemoryFs> {
    let fs = Arc::new(InMemoryFs::new());
    for dir in dirs {
        fs.add_dir(dir).unwrap();
    }
    for file in files {
        fs.add_file(file, 1).unwrap();
    }
    fs
}

fn resolver(fs: Arc<InMemoryFs>) -> AdjacentFolderResolver {
    AdjacentFolderResolver::new(fs, Arc::new(PrefixExclusions::default()))
}

async fn next(resolver: &AdjacentFolderResolver, from: &str) -> Option<String> {
    resolver
        .find_adjacent(&vp(from), Direction::Next)
        .await
        .unwrap()
        .map(|p| p.to_string())
}

async fn prev(resolver: &AdjacentFolderResolver, from: &str) -> Option<String> {
    resolver
        .find_adjacent(&vp(from), Direction::Prev)
        .await
        .unwrap()
        .map(|p| p.to_string())
}

#[tokio::test]
async fn folder_with_direct_media_is_returned_over_its_children() {
    let r = resolver(tree(&["/A/1.jpg", "/A/sub/2.jpg", "/B/3.jpg"], &[]));

    assert_eq!(next(&r, "/A").await.as_deref(), Some("/B"));
    assert_eq!(prev(&r, "/B").await.as_deref(), Some("/A"));
}

#[tokio::test]
async fn tree_without_media_has_no_neighbours() {
    let r = resolver(tree(&["/a/readme.txt", "/b/c/notes.pdf"], &["/b/d", "/e"]));

    for dir in ["/", "/a", "/b", "/b/c", "/b/d", "/e"] {
        assert_eq!(next(&r, dir).await, None, "next of {dir}");
        assert_eq!(prev(&r, dir).await, None, "prev of {dir}");
    }
}

#[tokio::test]
async fn next_and_prev_are_inverse_across_the_tree() {
    let r = resolver(tree(
        &[
            "/a/x.jpg",
            "/b/c/1.jpg",
            "/b/d/e/1.mp4",
            "/f/1.mp3",
            "/f/g/1.jpg",
        ],
        &["/b/empty"],
    ));

    let expected = ["/a", "/b/c", "/b/d/e", "/f"];
    let mut walked = vec![next(&r, "/").await.unwrap()];
    while let Some(following) = next(&r, walked.last().unwrap()).await {
        walked.push(following);
    }
    assert_eq!(walked, expected);

    for pair in expected.windows(2) {
        assert_eq!(prev(&r, pair[1]).await.as_deref(), Some(pair[0]));
    }
    assert_eq!(prev(&r, "/a").await, None);
}

#[tokio::test]
async fn siblings_are_visited_in_natural_order() {
    let r = resolver(tree(&["/img10/x.jpg", "/img2/x.jpg", "/img1/x.jpg"], &[]));

    assert_eq!(next(&r, "/img1").await.as_deref(), Some("/img2"));
    assert_eq!(next(&r, "/img2").await.as_deref(), Some("/img10"));
    assert_eq!(prev(&r, "/img10").await.as_deref(), Some("/img2"));
}

#[tokio::test]
async fn single_media_folder_does_not_wrap_around() {
    let r = resolver(tree(&["/only/a.jpg"], &["/empty", "/zzz"]));

    assert_eq!(next(&r, "/").await.as_deref(), Some("/only"));
    assert_eq!(next(&r, "/only").await, None);
    assert_eq!(prev(&r, "/only").await, None);
}

#[tokio::test]
async fn excluded_and_hidden_folders_are_skipped() {
    let fs = tree(
        &["/a/x.jpg", "/admin/x.jpg", "/b/.cache/x.jpg", "/c/x.jpg"],
        &[],
    );
    let r = AdjacentFolderResolver::new(
        fs,
        Arc::new(PrefixExclusions::new([vp("/admin")], true)),
    );

    assert_eq!(next(&r, "/a").await.as_deref(), Some("/c"));
    assert_eq!(prev(&r, "/c").await.as_deref(), Some("/a"));
}

#[tokio::test]
async fn removed_current_folder_still_navigates() {
    let fs = tree(&["/a/x.jpg", "/b/x.jpg", "/c/x.jpg"], &[]);
    let r = resolver(Arc::clone(&fs));
    fs.remove("/b").unwrap();

    assert_eq!(next(&r, "/b").await.as_deref(), Some("/c"));
    assert_eq!(prev(&r, "/b").await.as_deref(), Some("/a"));
}

#[tokio::test]
async fn root_with_media_is_a_stop() {
    let r = resolver(tree(&["/cover.jpg", "/a/x.jpg"], &[]));

    assert_eq!(next(&r, "/").await.as_deref(), Some("/a"));
    assert_eq!(prev(&r, "/a").await.as_deref(), Some("/"));
    assert_eq!(prev(&r, "/").await, None);
}

#[tokio::test]
async fn audio_counts_as_media_but_documents_do_not() {
    let r = resolver(tree(&["/a/readme.txt", "/b/song.mp3"], &[]));

    assert_eq!(next(&r, "/").await.as_deref(), Some("/b"));
    assert_eq!(prev(&r, "/b").await, None);
}

#[tokio::test]
async fn descends_from_a_folder_without_media() {
    let r = resolver(tree(&["/a/b/c/x.jpg", "/d/x.jpg"], &[]));

    assert_eq!(next(&r, "/a").await.as_deref(), Some("/a/b/c"));
    assert_eq!(next(&r, "/a/b/c").await.as_deref(), Some("/d"));
    assert_eq!(prev(&r, "/d").await.as_deref(), Some("/a/b/c"));
    assert_eq!(
        r.find_adjacent(&VirtualPath::root(), Direction::Prev).await.unwrap(),
        None
    );
}

#[cfg(unix)]
#[tokio::test]
async fn linked_directories_are_not_walked() {
    use mediadex_core::fs::LocalFilesystem;
    use std::os::unix::fs::symlink;

    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("a")).unwrap();
    std::fs::create_dir_all(root.path().join("b")).unwrap();
    std::fs::create_dir_all(root.path().join("c")).unwrap();
    std::fs::write(root.path().join("b/x.jpg"), b"x").unwrap();
    symlink("..", root.path().join("a/up1")).unwrap();
    symlink("..", root.path().join("a/up2")).unwrap();
    symlink("../b/x.jpg", root.path().join("c/link.jpg")).unwrap();

    let r = AdjacentFolderResolver::new(
        Arc::new(LocalFilesystem::new(root.path())),
        Arc::new(PrefixExclusions::default()),
    );

    assert_eq!(next(&r, "/").await.as_deref(), Some("/b"));
    assert_eq!(next(&r, "/a").await.as_deref(), Some("/b"));
    assert_eq!(next(&r, "/b").await.as_deref(), Some("/c"));
    assert_eq!(prev(&r, "/c").await.as_deref(), Some("/b"));
    assert_eq!(prev(&r, "/b").await, None);
}
