//! Mirroring through the native backend

use crate::common::{collect_until_ready, init_tracing, wait_for, wait_until, TestTree};
use anyhow::Result;
use cpx_core::MirrorConfig;
use cpx_watcher::{WatchEvent, WatchOptions, WatchState, Watcher};
use std::path::{Path, PathBuf};

fn scenario_tree() -> Result<TestTree> {
    let tree = TestTree::new()?;
    tree.write("a/hello.txt", "Hello")?;
    tree.write("a/b/note.dat", "ignored")?;
    Ok(tree)
}

fn watcher_for(tree: &TestTree, source: &str, dest: &str) -> Result<Watcher> {
    let mut config = MirrorConfig::new(source, dest);
    config.watch.debounce_ms = 50;
    Ok(Watcher::new(WatchOptions::from_config(config, tree.root())?)?)
}

#[tokio::test]
async fn test_initial_copy_then_live_mirror() -> Result<()> {
    init_tracing();
    let tree = scenario_tree()?;
    let watcher = watcher_for(&tree, "a/**/*.txt", "b")?;
    let mut events = watcher.subscribe();

    watcher.open().await?;
    let opened = collect_until_ready(&mut events).await?;

    assert_eq!(
        opened,
        vec![
            WatchEvent::Copy {
                src: PathBuf::from("a/hello.txt"),
                dst: PathBuf::from("b/hello.txt"),
            },
            WatchEvent::Ready,
        ]
    );
    assert_eq!(tree.read("b/hello.txt").as_deref(), Some("Hello"));
    assert!(!tree.exists("b/b/note.dat"));
    assert_eq!(watcher.state(), WatchState::Ready);
    assert_eq!(
        watcher.watched_dirs(),
        vec![PathBuf::from("a"), PathBuf::from("a/b")]
    );

    // New file in an already watched subdirectory
    tree.write("a/b/new.txt", "added")?;
    wait_for(&mut events, |e| {
        matches!(e, WatchEvent::Copy { dst, .. } if dst == Path::new("b/b/new.txt"))
    })
    .await?;
    assert_eq!(tree.read("b/b/new.txt").as_deref(), Some("added"));

    // Deletion removes the counterpart; the destination root stays
    std::fs::remove_file(tree.path("a/hello.txt"))?;
    wait_for(&mut events, |e| {
        matches!(e, WatchEvent::Remove { path } if path == Path::new("b/hello.txt"))
    })
    .await?;
    assert!(!tree.exists("b/hello.txt"));
    assert!(tree.exists("b"));

    // Last file under b/b goes, and the now-empty directory with it
    std::fs::remove_file(tree.path("a/b/new.txt"))?;
    wait_for(&mut events, |e| {
        matches!(e, WatchEvent::Remove { path } if path == Path::new("b/b/new.txt"))
    })
    .await?;
    assert!(!tree.exists("b/b"));

    watcher.close();
    Ok(())
}

#[tokio::test]
async fn test_new_directory_is_watched_recursively() -> Result<()> {
    init_tracing();
    let tree = scenario_tree()?;
    let watcher = watcher_for(&tree, "a/**/*.txt", "out")?;
    let mut events = watcher.subscribe();

    watcher.open().await?;
    collect_until_ready(&mut events).await?;

    tree.mkdir("a/fresh/deep")?;
    let watched = wait_until(|| {
        watcher
            .watched_dirs()
            .contains(&PathBuf::from("a/fresh/deep"))
    })
    .await;
    assert!(watched, "new directories were never watched");

    tree.write("a/fresh/deep/x.txt", "deep")?;
    wait_for(&mut events, |e| {
        matches!(e, WatchEvent::Copy { dst, .. } if dst == Path::new("out/fresh/deep/x.txt"))
    })
    .await?;
    assert_eq!(tree.read("out/fresh/deep/x.txt").as_deref(), Some("deep"));

    // Whole subtree disappears at once
    std::fs::remove_dir_all(tree.path("a/fresh"))?;
    wait_for(&mut events, |e| {
        matches!(e, WatchEvent::Remove { path } if path == Path::new("out/fresh/deep/x.txt"))
    })
    .await?;
    let unwatched = wait_until(|| {
        !watcher
            .watched_dirs()
            .iter()
            .any(|d| d.starts_with("a/fresh"))
    })
    .await;
    assert!(unwatched, "removed directories are still watched");
    assert!(!tree.exists("out/fresh"));

    Ok(())
}

#[tokio::test]
async fn test_single_file_glob() -> Result<()> {
    init_tracing();
    let tree = scenario_tree()?;
    let watcher = watcher_for(&tree, "a/hello.txt", "out")?;
    let mut events = watcher.subscribe();

    watcher.open().await?;
    collect_until_ready(&mut events).await?;
    assert_eq!(tree.read("out/hello.txt").as_deref(), Some("Hello"));

    tree.write("a/hello.txt", "Hello again")?;
    wait_for(&mut events, |e| {
        matches!(e, WatchEvent::Copy { src, .. } if src == Path::new("a/hello.txt"))
    })
    .await?;
    assert_eq!(tree.read("out/hello.txt").as_deref(), Some("Hello again"));

    Ok(())
}
