//! Serialized event loop
//!
//! Owns the classifier, the pending queue, the debouncer and the executor.
//! Raw notifications, debounce expiry and drain completion are all handled on
//! this one task, so the queue has a single writer. Copy/remove calls run on a
//! separate task while the loop keeps classifying into the queue for the next
//! drain.

use crate::classify::{ChangeClassifier, Classification, Classified};
use crate::debounce::Debouncer;
use crate::executor::{Outcome, SyncExecutor};
use crate::platform::{RawNotification, RawReceiver};
use crate::queue::EventQueue;
use crate::{Shared, WatchError, WatchEvent, WatchState};
use cpx_core::PathMatcher;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, trace};

/// Decides which classified actions are mirrored
pub(crate) struct ActionFilter {
    matcher: PathMatcher,
    include_empty_dirs: bool,
}

impl ActionFilter {
    pub(crate) fn new(matcher: PathMatcher, include_empty_dirs: bool) -> Self {
        Self {
            matcher,
            include_empty_dirs,
        }
    }

    /// Files matching the glob, plus matching directories when empty
    /// directories are mirrored too
    pub(crate) fn accepts(&self, classified: &Classified) -> bool {
        (!classified.is_dir || self.include_empty_dirs) && self.matcher.matches(&classified.path)
    }
}

pub(crate) struct Engine {
    pub(crate) classifier: ChangeClassifier,
    pub(crate) executor: SyncExecutor,
    pub(crate) filter: ActionFilter,
    pub(crate) queue: EventQueue,
    pub(crate) debouncer: Debouncer,
    pub(crate) raw_rx: RawReceiver,
    pub(crate) shared: Arc<Shared>,
}

impl Engine {
    /// Run until the watcher is closed
    pub(crate) async fn run(mut self) {
        let mut drain: Option<JoinHandle<Vec<Outcome>>> = None;

        loop {
            if self.shared.is_closed() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.shared.shutdown.notified() => break,

                raw = self.raw_rx.recv() => match raw {
                    Some(raw) => self.on_raw(raw).await,
                    None => break,
                },

                result = join_drain(&mut drain), if drain.is_some() => {
                    drain = None;
                    self.finish_drain(result);
                }

                _ = self.debouncer.wait(), if drain.is_none() && self.debouncer.is_armed() => {
                    drain = self.start_drain();
                }
            }

            self.shared.set_pending(
                drain.is_some() || self.debouncer.is_armed() || !self.queue.is_empty(),
            );
        }

        // An in-flight drain finishes on its own; its results are dropped
        self.debouncer.cancel();
        self.queue.clear();
        self.classifier.clear();
        debug!("Event loop stopped");
    }

    async fn on_raw(&mut self, raw: RawNotification) {
        let mut out = Classification::default();

        match raw {
            RawNotification::Changed(path) => self.classifier.notify(&path, &mut out).await,
            RawNotification::Rescan => self.classifier.rescan(&mut out).await,
            RawNotification::Error { path, message } => {
                self.classifier.backend_error(path.as_deref(), message, &mut out)
            }
        }

        self.absorb(out);
    }

    /// Queue accepted actions and surface errors
    pub(crate) fn absorb(&mut self, out: Classification) {
        for error in &out.errors {
            self.shared.emit(WatchEvent::from_error(error));
        }

        let mut queued = false;
        for classified in out.actions {
            if self.filter.accepts(&classified) {
                trace!("Queued {:?} {}", classified.kind, classified.path.display());
                self.queue.push(classified.path, classified.kind);
                queued = true;
            }
        }

        if queued {
            self.debouncer.arm();
        }
    }

    fn start_drain(&mut self) -> Option<JoinHandle<Vec<Outcome>>> {
        self.debouncer.cancel();

        let entries = self.queue.take();
        if entries.is_empty() {
            self.shared.set_state(WatchState::Ready);
            return None;
        }

        self.shared.set_state(WatchState::Draining);
        debug!("Draining {} pending actions", entries.len());

        let runner = self.executor.runner();
        Some(tokio::spawn(async move { runner.run(entries).await }))
    }

    fn finish_drain(&mut self, result: Result<Vec<Outcome>, JoinError>) {
        match result {
            Ok(outcomes) => {
                for event in self.executor.settle(outcomes, &mut self.queue) {
                    self.shared.emit(event);
                }
            }
            Err(e) => self.shared.emit(WatchEvent::from_error(&WatchError::Task(e))),
        }

        if self.queue.is_empty() {
            debug!("Drain finished");
            self.shared.set_state(WatchState::Ready);
        } else {
            // Refilled while draining: wait for the next quiet period
            debug!("Drain finished with {} actions pending", self.queue.len());
            self.debouncer.arm();
        }
    }
}

async fn join_drain(drain: &mut Option<JoinHandle<Vec<Outcome>>>) -> Result<Vec<Outcome>, JoinError> {
    match drain.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
