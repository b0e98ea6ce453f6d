//! Scenarios with hand-injected notifications

use crate::common::{collect_until_ready, expect_quiet, init_tracing, wait_for, TestTree};
use anyhow::Result;
use async_trait::async_trait;
use cpx_core::{FileOps, LocalFileOps, WatchConfig};
use cpx_watcher::{
    ManualBackend, RawNotification, WatchBackend, WatchError, WatchEvent, WatchOptions, WatchState,
    Watcher,
};
use parking_lot::Mutex;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(300);

fn options(tree: &TestTree, glob: &str, dest: &str) -> WatchOptions {
    let mut options = WatchOptions::new(glob, dest, tree.root());
    options.config = WatchConfig {
        debounce_ms: 20,
        ..WatchConfig::default()
    };
    options
}

async fn open_manual(options: WatchOptions) -> Result<(Watcher, tokio::sync::broadcast::Receiver<WatchEvent>)> {
    let watcher = Watcher::new(options)?.with_backend(Box::new(ManualBackend::new()));
    let mut events = watcher.subscribe();
    watcher.open().await?;
    collect_until_ready(&mut events).await?;
    Ok((watcher, events))
}

/// Counts copies on top of the local filesystem
struct CountingOps {
    inner: LocalFileOps,
    copies: AtomicUsize,
}

#[async_trait]
impl FileOps for CountingOps {
    async fn copy(&self, src: &Path, dst: &Path) -> io::Result<()> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.inner.copy(src, dst).await
    }

    async fn remove(&self, dst: &Path) -> io::Result<()> {
        self.inner.remove(dst).await
    }
}

/// Fails the first `failures` copies as if the source were locked
struct LockedOps {
    inner: LocalFileOps,
    failures: Mutex<u32>,
}

#[async_trait]
impl FileOps for LockedOps {
    async fn copy(&self, src: &Path, dst: &Path) -> io::Result<()> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(io::Error::new(ErrorKind::PermissionDenied, "locked"));
            }
        }
        self.inner.copy(src, dst).await
    }

    async fn remove(&self, dst: &Path) -> io::Result<()> {
        self.inner.remove(dst).await
    }
}

/// Refuses to watch one directory, delegating the rest
struct RefusingBackend {
    inner: ManualBackend,
    refuse: PathBuf,
}

impl WatchBackend for RefusingBackend {
    fn watch(&mut self, dir: &Path) -> cpx_watcher::Result<()> {
        if dir == self.refuse {
            return Err(WatchError::Backend(format!("{}: refused", dir.display())));
        }
        self.inner.watch(dir)
    }

    fn unwatch(&mut self, dir: &Path) {
        self.inner.unwatch(dir);
    }

    fn watched(&self) -> Vec<PathBuf> {
        self.inner.watched()
    }
}

#[tokio::test]
async fn test_add_then_remove_before_drain_is_a_noop() -> Result<()> {
    init_tracing();
    let tree = TestTree::new()?;
    tree.mkdir("a")?;
    let (watcher, mut events) = open_manual(options(&tree, "a/**/*.txt", "b")).await?;

    tree.write("a/tmp.txt", "short-lived")?;
    tree.touch_notify(&watcher, "a/tmp.txt")?;
    std::fs::remove_file(tree.path("a/tmp.txt"))?;
    tree.touch_notify(&watcher, "a/tmp.txt")?;

    assert!(expect_quiet(&mut events, QUIET).await.is_empty());
    assert!(!tree.exists("b/tmp.txt"));
    assert!(!watcher.is_pending());
    Ok(())
}

#[tokio::test]
async fn test_rapid_changes_copy_once() -> Result<()> {
    init_tracing();
    let tree = TestTree::new()?;
    tree.write("a/busy.txt", "0")?;

    let ops = Arc::new(CountingOps {
        inner: LocalFileOps::new(tree.path("b")),
        copies: AtomicUsize::new(0),
    });
    let mut opts = options(&tree, "a/*.txt", "b").with_ops(ops.clone());
    opts.initial_copy = false;
    opts.config.debounce_ms = 100;
    let (watcher, mut events) = open_manual(opts).await?;

    for i in 1..=20 {
        tree.write("a/busy.txt", &i.to_string())?;
        tree.touch_notify(&watcher, "a/busy.txt")?;
    }

    let copies: Vec<_> = expect_quiet(&mut events, QUIET)
        .await
        .into_iter()
        .filter(|e| matches!(e, WatchEvent::Copy { .. }))
        .collect();

    assert_eq!(copies.len(), 1);
    assert_eq!(ops.copies.load(Ordering::SeqCst), 1);
    assert_eq!(tree.read("b/busy.txt").as_deref(), Some("20"));
    Ok(())
}

#[tokio::test]
async fn test_directory_removal_removes_last_snapshot() -> Result<()> {
    init_tracing();
    let tree = TestTree::new()?;
    tree.write("a/d/x.txt", "x")?;
    tree.write("a/d/e/y.txt", "y")?;
    tree.write("a/keep.txt", "k")?;
    let (watcher, mut events) = open_manual(options(&tree, "a/**/*.txt", "b")).await?;
    assert!(tree.exists("b/d/e/y.txt"));

    std::fs::remove_dir_all(tree.path("a/d"))?;
    tree.touch_notify(&watcher, "a/d")?;

    let mut removed: Vec<_> = expect_quiet(&mut events, QUIET)
        .await
        .into_iter()
        .filter_map(|e| match e {
            WatchEvent::Remove { path } => Some(path),
            _ => None,
        })
        .collect();
    removed.sort();

    assert_eq!(
        removed,
        vec![PathBuf::from("b/d/e/y.txt"), PathBuf::from("b/d/x.txt")]
    );
    assert!(!tree.exists("b/d"));
    assert!(tree.exists("b/keep.txt"));
    assert_eq!(watcher.watched_dirs(), vec![PathBuf::from("a")]);
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent_and_silences_events() -> Result<()> {
    init_tracing();
    let tree = TestTree::new()?;
    tree.mkdir("a")?;
    let (watcher, mut events) = open_manual(options(&tree, "a/*.txt", "b")).await?;

    tree.write("a/late.txt", "late")?;
    let notifier = watcher.notifier();
    notifier.send(RawNotification::Changed(tree.path("a/late.txt")))?;

    watcher.close();
    watcher.close();
    assert_eq!(watcher.state(), WatchState::Closed);
    assert!(!watcher.is_ready());
    assert!(watcher.watched_dirs().is_empty());

    // The loop is gone; nothing more is observed
    let _ = notifier.send(RawNotification::Changed(tree.path("a/late.txt")));
    assert!(expect_quiet(&mut events, QUIET).await.is_empty());
    assert!(!tree.exists("b/late.txt"));
    Ok(())
}

#[tokio::test]
async fn test_notification_without_change_is_a_noop() -> Result<()> {
    init_tracing();
    let tree = TestTree::new()?;
    tree.mkdir("a/sub")?;
    let (watcher, mut events) = open_manual(options(&tree, "a/**/*.txt", "b")).await?;

    tree.touch_notify(&watcher, "a/missing.txt")?;
    tree.touch_notify(&watcher, "a/sub")?;
    tree.touch_notify(&watcher, "elsewhere/x.txt")?;

    assert!(expect_quiet(&mut events, QUIET).await.is_empty());
    assert_eq!(watcher.state(), WatchState::Ready);
    Ok(())
}

#[tokio::test]
async fn test_include_empty_dirs() -> Result<()> {
    init_tracing();
    let tree = TestTree::new()?;
    tree.mkdir("a/empty")?;
    let mut opts = options(&tree, "a/**", "b");
    opts.include_empty_dirs = true;
    let (watcher, mut events) = open_manual(opts).await?;
    assert!(tree.path("b/empty").is_dir());

    tree.mkdir("a/later")?;
    tree.touch_notify(&watcher, "a/later")?;
    wait_for(&mut events, |e| {
        matches!(e, WatchEvent::Copy { dst, .. } if dst == Path::new("b/later"))
    })
    .await?;
    assert!(tree.path("b/later").is_dir());

    std::fs::remove_dir(tree.path("a/empty"))?;
    tree.touch_notify(&watcher, "a/empty")?;
    wait_for(&mut events, |e| {
        matches!(e, WatchEvent::Remove { path } if path == Path::new("b/empty"))
    })
    .await?;
    assert!(!tree.exists("b/empty"));
    Ok(())
}

#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<()> {
    init_tracing();
    let tree = TestTree::new()?;
    tree.mkdir("a")?;

    let ops = Arc::new(LockedOps {
        inner: LocalFileOps::new(tree.path("b")),
        failures: Mutex::new(3),
    });
    let (watcher, mut events) = open_manual(options(&tree, "a/*.txt", "b").with_ops(ops)).await?;

    tree.write("a/locked.txt", "finally")?;
    tree.touch_notify(&watcher, "a/locked.txt")?;

    wait_for(&mut events, |e| matches!(e, WatchEvent::Copy { .. })).await?;
    assert_eq!(tree.read("b/locked.txt").as_deref(), Some("finally"));
    Ok(())
}

#[tokio::test]
async fn test_rescan_picks_up_missed_changes() -> Result<()> {
    init_tracing();
    let tree = TestTree::new()?;
    tree.write("a/old.txt", "old")?;
    let (watcher, mut events) = open_manual(options(&tree, "a/*.txt", "b")).await?;

    // Nothing is notified for these
    std::fs::remove_file(tree.path("a/old.txt"))?;
    tree.write("a/missed.txt", "missed")?;
    watcher.notifier().send(RawNotification::Rescan)?;

    let mut seen = Vec::new();
    while seen.len() < 2 {
        seen.push(
            wait_for(&mut events, |e| {
                matches!(e, WatchEvent::Copy { .. } | WatchEvent::Remove { .. })
            })
            .await?,
        );
    }

    assert!(seen.contains(&WatchEvent::Copy {
        src: PathBuf::from("a/missed.txt"),
        dst: PathBuf::from("b/missed.txt"),
    }));
    assert!(seen.contains(&WatchEvent::Remove {
        path: PathBuf::from("b/old.txt"),
    }));
    Ok(())
}

#[tokio::test]
async fn test_refused_watch_reports_error_and_keeps_siblings() -> Result<()> {
    init_tracing();
    let tree = TestTree::new()?;
    tree.write("a/bad/x.txt", "x")?;
    tree.write("a/good/y.txt", "y")?;

    let backend = RefusingBackend {
        inner: ManualBackend::new(),
        refuse: tree.path("a/bad"),
    };
    let watcher = Watcher::new(options(&tree, "a/**/*.txt", "b"))?.with_backend(Box::new(backend));
    let mut events = watcher.subscribe();
    watcher.open().await?;
    let opened = collect_until_ready(&mut events).await?;

    let errors = opened
        .iter()
        .filter(|e| matches!(e, WatchEvent::Error { message, .. } if message.contains("refused")))
        .count();
    assert_eq!(errors, 1);
    assert_eq!(tree.read("b/bad/x.txt").as_deref(), Some("x"));
    assert_eq!(tree.read("b/good/y.txt").as_deref(), Some("y"));
    assert_eq!(
        watcher.watched_dirs(),
        vec![PathBuf::from("a"), PathBuf::from("a/good")]
    );

    // The sibling is still live
    tree.write("a/good/z.txt", "z")?;
    tree.touch_notify(&watcher, "a/good/z.txt")?;
    wait_for(&mut events, |e| {
        matches!(e, WatchEvent::Copy { dst, .. } if dst == Path::new("b/good/z.txt"))
    })
    .await?;
    assert_eq!(watcher.state(), WatchState::Ready);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_root_fails_open() -> Result<()> {
    init_tracing();
    let tree = TestTree::new()?;
    // Resolving a self-referential link fails with ELOOP, even for root
    std::os::unix::fs::symlink("loop", tree.path("loop"))?;

    let watcher =
        Watcher::new(options(&tree, "loop/*.txt", "b"))?.with_backend(Box::new(ManualBackend::new()));
    let mut events = watcher.subscribe();

    let err = watcher.open().await.unwrap_err();
    assert!(matches!(err, WatchError::Walk { .. }), "{}", err);
    assert_eq!(watcher.state(), WatchState::Closed);
    assert!(!watcher.is_ready());
    assert!(!expect_quiet(&mut events, QUIET)
        .await
        .contains(&WatchEvent::Ready));
    Ok(())
}
