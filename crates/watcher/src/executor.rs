//! Sync executor: replays queued actions against the destination
//!
//! A drain is split in two. [`Runner::run`] performs the copy/remove calls
//! with bounded fan-out and is cheap to move into a background task.
//! [`SyncExecutor::settle`] then folds the outcomes back on the event loop:
//! emitting events, bumping retry counters and re-enqueueing transient
//! failures.

use crate::queue::{ActionKind, EventQueue};
use crate::{WatchError, WatchEvent};
use ahash::AHashMap;
use cpx_core::{is_transient, FileOps, Normalizer, Translator};
use futures::stream::{self, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What happened to one queued action
#[derive(Debug)]
pub enum OpResult {
    /// Copy or remove succeeded
    Done,
    /// Path translates onto itself (outside the glob's base)
    Skipped,
    /// Collaborator failed
    Failed(io::Error),
}

/// Result of executing one queue entry
#[derive(Debug)]
pub struct Outcome {
    pub path: PathBuf,
    pub kind: ActionKind,
    pub dst: PathBuf,
    pub result: OpResult,
}

impl Outcome {
    fn into_error(self, source: io::Error) -> WatchError {
        match self.kind {
            ActionKind::Add | ActionKind::Change => WatchError::Copy {
                src: self.path,
                dst: self.dst,
                source,
            },
            ActionKind::Remove => WatchError::Remove {
                path: self.dst,
                source,
            },
        }
    }
}

/// Performs queue entries against the copy/remove collaborators
#[derive(Clone)]
pub struct Runner {
    ops: Arc<dyn FileOps>,
    translator: Arc<Translator>,
    normalizer: Normalizer,
    concurrency: usize,
}

impl Runner {
    /// Create a runner
    pub fn new(
        ops: Arc<dyn FileOps>,
        translator: Translator,
        normalizer: Normalizer,
        concurrency: usize,
    ) -> Self {
        Self {
            ops,
            translator: Arc::new(translator),
            normalizer,
            concurrency: concurrency.max(1),
        }
    }

    /// Execute one entry
    pub async fn execute(&self, path: PathBuf, kind: ActionKind) -> Outcome {
        let dst = self.translator.translate(&path);

        if dst == path {
            trace!("Skipping {} (outside {})", path.display(), self.translator.base().display());
            return Outcome {
                path,
                kind,
                dst,
                result: OpResult::Skipped,
            };
        }

        let src_abs = self.normalizer.absolute(&path);
        let dst_abs = self.normalizer.absolute(&dst);
        let result = match kind {
            ActionKind::Add | ActionKind::Change => self.ops.copy(&src_abs, &dst_abs).await,
            ActionKind::Remove => self.ops.remove(&dst_abs).await,
        };

        Outcome {
            path,
            kind,
            dst,
            result: match result {
                Ok(()) => OpResult::Done,
                Err(e) => OpResult::Failed(e),
            },
        }
    }

    /// Execute entries with bounded concurrency
    ///
    /// Entries are started in order and outcomes come back in the same order.
    pub async fn run(&self, entries: Vec<(PathBuf, ActionKind)>) -> Vec<Outcome> {
        stream::iter(entries)
            .map(|(path, kind)| self.execute(path, kind))
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

/// Consecutive transient failures per path
#[derive(Debug, Default)]
pub struct RetryCounters {
    counts: AHashMap<PathBuf, u32>,
}

impl RetryCounters {
    /// Current count for a path (absent means zero)
    pub fn get(&self, path: &Path) -> Option<u32> {
        self.counts.get(path).copied()
    }

    /// Increment and return the new count
    pub fn bump(&mut self, path: &Path) -> u32 {
        let count = self.counts.entry(path.to_path_buf()).or_insert(0);
        *count += 1;
        *count
    }

    /// Forget a path
    pub fn reset(&mut self, path: &Path) {
        self.counts.remove(path);
    }

    /// Number of paths with a pending retry
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether no path is being retried
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Runner plus retry bookkeeping
pub struct SyncExecutor {
    runner: Runner,
    retries: RetryCounters,
    max_retries: u32,
}

impl SyncExecutor {
    /// Create an executor that retries transient failures up to `max_retries` times
    pub fn new(runner: Runner, max_retries: u32) -> Self {
        Self {
            runner,
            retries: RetryCounters::default(),
            max_retries,
        }
    }

    /// Handle for running a drain off the event loop
    pub fn runner(&self) -> Runner {
        self.runner.clone()
    }

    /// Retry bookkeeping
    pub fn retries(&self) -> &RetryCounters {
        &self.retries
    }

    /// Fold drain outcomes back, re-enqueueing transient failures
    pub fn settle(&mut self, outcomes: Vec<Outcome>, queue: &mut EventQueue) -> Vec<WatchEvent> {
        let mut events = Vec::with_capacity(outcomes.len());

        for mut outcome in outcomes {
            match std::mem::replace(&mut outcome.result, OpResult::Done) {
                OpResult::Skipped => self.retries.reset(&outcome.path),
                OpResult::Done => {
                    self.retries.reset(&outcome.path);
                    events.push(success_event(outcome));
                }
                OpResult::Failed(e) => {
                    let attempts = self.retries.get(&outcome.path).unwrap_or(0);

                    if is_transient(&e) && attempts < self.max_retries {
                        let attempt = self.retries.bump(&outcome.path);
                        debug!(
                            "Retrying {:?} {} ({}/{}): {}",
                            outcome.kind,
                            outcome.path.display(),
                            attempt,
                            self.max_retries,
                            e
                        );
                        if !queue.requeue(outcome.path.clone(), outcome.kind) {
                            // Superseded by a change observed during the drain
                            self.retries.reset(&outcome.path);
                        }
                    } else {
                        self.retries.reset(&outcome.path);
                        let error = outcome.into_error(e);
                        warn!("{}", error);
                        events.push(WatchEvent::from_error(&error));
                    }
                }
            }
        }

        events
    }

    /// Fold initial-copy outcomes back; failures are surfaced without retry
    pub fn settle_initial(&mut self, outcomes: Vec<Outcome>) -> Vec<WatchEvent> {
        let mut events = Vec::with_capacity(outcomes.len());

        for mut outcome in outcomes {
            match std::mem::replace(&mut outcome.result, OpResult::Done) {
                OpResult::Skipped => {}
                OpResult::Done => events.push(success_event(outcome)),
                OpResult::Failed(e) => {
                    let error = outcome.into_error(e);
                    warn!("Initial copy failed: {}", error);
                    events.push(WatchEvent::from_error(&error));
                }
            }
        }

        events
    }

    /// Take everything pending, run it and settle the outcomes
    pub async fn drain(&mut self, queue: &mut EventQueue) -> Vec<WatchEvent> {
        let entries = queue.take();
        if entries.is_empty() {
            return Vec::new();
        }

        let outcomes = self.runner.run(entries).await;
        self.settle(outcomes, queue)
    }
}

fn success_event(outcome: Outcome) -> WatchEvent {
    match outcome.kind {
        ActionKind::Add | ActionKind::Change => {
            trace!("Copied {} -> {}", outcome.path.display(), outcome.dst.display());
            WatchEvent::Copy {
                src: outcome.path,
                dst: outcome.dst,
            }
        }
        ActionKind::Remove => {
            trace!("Removed {}", outcome.dst.display());
            WatchEvent::Remove { path: outcome.dst }
        }
    }
}
