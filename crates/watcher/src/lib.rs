//! Watch-and-sync engine for cpx
//!
//! This crate keeps a destination directory mirroring the files a glob
//! selects under a source tree:
//! - One non-recursive OS watch per live directory
//! - Snapshot diffing into add/change/remove actions
//! - Collapsing per-path queue with a debounced drain
//! - Bounded-concurrency copy/remove with transient-error retries
//!
//! ```no_run
//! # async fn demo() -> cpx_watcher::Result<()> {
//! use cpx_watcher::{WatchEvent, WatchOptions, Watcher};
//!
//! let watcher = Watcher::new(WatchOptions::new("src/**/*.txt", "out", "."))?;
//! let mut events = watcher.subscribe();
//! watcher.open().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let WatchEvent::Copy { src, dst } = event {
//!         println!("{} -> {}", src.display(), dst.display());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod debounce;
mod engine;
pub mod error;
pub mod executor;
pub mod platform;
pub mod queue;
pub mod registry;
pub mod walk;

pub use error::{Result, WatchError};
pub use platform::{ManualBackend, NotifyBackend, RawNotification, RawSender, WatchBackend};
pub use queue::ActionKind;

use classify::{ChangeClassifier, Classification};
use cpx_core::{FileOps, LocalFileOps, MirrorConfig, Normalizer, PathMatcher, Translator, WatchConfig};
use debounce::Debouncer;
use engine::{ActionFilter, Engine};
use executor::{Runner, SyncExecutor};
use parking_lot::{Mutex, RwLock};
use platform::RawReceiver;
use queue::EventQueue;
use registry::{SharedBackend, WatchRegistry};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Events buffered per subscriber before it starts lagging
const EVENT_CAPACITY: usize = 1024;

/// Watcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Unopened,
    /// Initial walk and copy in progress
    Opening,
    /// Watching, no drain running
    Ready,
    /// Queue is being flushed to the destination
    Draining,
    /// Terminal
    Closed,
}

/// Observable watcher event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// Every directory is watched and the initial copy has settled (fires once)
    Ready,
    /// A source file was copied
    Copy { src: PathBuf, dst: PathBuf },
    /// A destination path was removed
    Remove { path: PathBuf },
    /// Something failed; watching continues
    Error {
        message: String,
        path: Option<PathBuf>,
    },
}

impl WatchEvent {
    /// Error event for a watcher error
    pub fn from_error(error: &WatchError) -> Self {
        Self::Error {
            message: error.to_string(),
            path: error.path().map(Path::to_path_buf),
        }
    }
}

/// Immutable watcher settings
pub struct WatchOptions {
    /// Source glob
    pub glob: String,
    /// Destination directory
    pub dest: PathBuf,
    /// Follow symlinked directories
    pub dereference: bool,
    /// Mirror directories matching the glob, even when empty
    pub include_empty_dirs: bool,
    /// Copy every matching file on open
    pub initial_copy: bool,
    /// Directory relative paths are resolved against
    pub cwd: PathBuf,
    /// Engine tuning
    pub config: WatchConfig,
    /// Copy/remove collaborators (defaults to [`LocalFileOps`] on the destination)
    pub ops: Option<Arc<dyn FileOps>>,
}

impl WatchOptions {
    /// Options with defaults for everything but glob, destination and working directory
    pub fn new(glob: impl Into<String>, dest: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            glob: glob.into(),
            dest: dest.into(),
            dereference: false,
            include_empty_dirs: false,
            initial_copy: true,
            cwd: cwd.into(),
            config: WatchConfig::default(),
            ops: None,
        }
    }

    /// Build options from a validated mirror config
    pub fn from_config(config: MirrorConfig, cwd: impl Into<PathBuf>) -> Result<Self> {
        let cwd = cwd.into();
        config.validate(&Normalizer::new(&cwd))?;

        Ok(Self {
            glob: config.source,
            dest: config.dest,
            dereference: config.dereference,
            include_empty_dirs: config.include_empty_dirs,
            initial_copy: config.initial_copy,
            cwd,
            config: config.watch,
            ops: None,
        })
    }

    /// Replace the copy/remove collaborators
    pub fn with_ops(mut self, ops: Arc<dyn FileOps>) -> Self {
        self.ops = Some(ops);
        self
    }
}

/// State shared between the handle and the event loop
pub(crate) struct Shared {
    state: RwLock<WatchState>,
    pending: AtomicBool,
    events: broadcast::Sender<WatchEvent>,
    shutdown: Notify,
}

impl Shared {
    fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(WatchState::Unopened),
            pending: AtomicBool::new(false),
            events,
            shutdown: Notify::new(),
        }
    }

    fn state(&self) -> WatchState {
        *self.state.read()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state() == WatchState::Closed
    }

    /// Move to `state` unless closed; returns whether it moved
    pub(crate) fn set_state(&self, state: WatchState) -> bool {
        let mut current = self.state.write();
        if *current == WatchState::Closed {
            return false;
        }
        *current = state;
        true
    }

    pub(crate) fn set_pending(&self, pending: bool) {
        self.pending.store(pending, Ordering::Release);
    }

    /// Publish an event; nothing is published once closed
    pub(crate) fn emit(&self, event: WatchEvent) {
        let state = self.state.read();
        if *state == WatchState::Closed {
            return;
        }
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Glob-filtered mirror of a source tree into a destination directory
///
/// Subscribe before [`Watcher::open`] to observe [`WatchEvent::Ready`].
/// Dropping the watcher closes it.
pub struct Watcher {
    shared: Arc<Shared>,
    backend: SharedBackend,
    normalizer: Normalizer,
    matcher: PathMatcher,
    translator: Translator,
    ops: Arc<dyn FileOps>,
    dereference: bool,
    include_empty_dirs: bool,
    initial_copy: bool,
    config: WatchConfig,
    raw_tx: RawSender,
    raw_rx: Mutex<Option<RawReceiver>>,
    custom_backend: Mutex<Option<Box<dyn WatchBackend>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Watcher {
    /// Create an unopened watcher
    pub fn new(options: WatchOptions) -> Result<Self> {
        options.config.validate()?;

        let normalizer = Normalizer::new(&options.cwd);
        let matcher = PathMatcher::new(&options.glob, &normalizer)?;
        let dest = normalizer.normalize(&options.dest);
        let translator = Translator::new(matcher.base().to_path_buf(), dest.clone());

        let ops = match options.ops {
            Some(ops) => ops,
            None => Arc::new(
                LocalFileOps::new(normalizer.absolute(&dest)).with_update(options.config.update),
            ),
        };

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        Ok(Self {
            shared: Arc::new(Shared::new()),
            backend: Arc::new(Mutex::new(None)),
            normalizer,
            matcher,
            translator,
            ops,
            dereference: options.dereference,
            include_empty_dirs: options.include_empty_dirs,
            initial_copy: options.initial_copy,
            config: options.config,
            raw_tx,
            raw_rx: Mutex::new(Some(raw_rx)),
            custom_backend: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Use a specific backend instead of the native one
    pub fn with_backend(self, backend: Box<dyn WatchBackend>) -> Self {
        *self.custom_backend.lock() = Some(backend);
        self
    }

    /// Sender feeding raw notifications straight into the event loop
    ///
    /// Paired with [`ManualBackend`] this lets an embedder (or a poller)
    /// drive the watcher.
    pub fn notifier(&self) -> RawSender {
        self.raw_tx.clone()
    }

    /// Receive watcher events
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.shared.events.subscribe()
    }

    /// Current lifecycle state
    pub fn state(&self) -> WatchState {
        self.shared.state()
    }

    /// Whether the watcher is open and watching
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), WatchState::Ready | WatchState::Draining)
    }

    /// Whether actions are queued, debouncing or being drained
    pub fn is_pending(&self) -> bool {
        !self.shared.is_closed() && self.shared.pending.load(Ordering::Acquire)
    }

    /// Normalized base directory being watched
    pub fn base(&self) -> &Path {
        self.matcher.base()
    }

    /// Directories currently watched, normalized and sorted
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let watched = match self.backend.lock().as_ref() {
            Some(backend) => backend.watched(),
            None => return Vec::new(),
        };

        let mut dirs: Vec<_> = watched
            .iter()
            .map(|dir| self.normalizer.normalize(dir))
            .collect();
        dirs.sort();
        dirs
    }

    /// Walk the base directory, watch it, run the initial copy and start the
    /// event loop
    ///
    /// Resolves once [`WatchEvent::Ready`] has been emitted. A failure to
    /// read the base directory itself closes the watcher.
    pub async fn open(&self) -> Result<()> {
        {
            let mut state = self.shared.state.write();
            match *state {
                WatchState::Unopened => *state = WatchState::Opening,
                WatchState::Closed => return Err(WatchError::Closed),
                _ => return Err(WatchError::AlreadyOpened),
            }
        }

        match self.start().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    async fn start(&self) -> Result<()> {
        let base = self.matcher.base().to_path_buf();
        info!(
            "Watching {} -> {}",
            self.matcher.pattern(),
            self.translator.dest().display()
        );

        let backend = match self.custom_backend.lock().take() {
            Some(backend) => backend,
            None => platform::create_backend(self.raw_tx.clone())?,
        };
        *self.backend.lock() = Some(backend);

        let registry = WatchRegistry::new(self.backend.clone(), self.normalizer.clone());
        let mut classifier =
            ChangeClassifier::new(registry, self.normalizer.clone(), base, self.dereference);

        let mut found = Classification::default();
        classifier.add_directory(classifier.root().to_path_buf(), &mut found).await?;
        debug!(
            "Initial walk: {} directories, {} entries",
            classifier.registry().len(),
            found.actions.len()
        );

        let filter = ActionFilter::new(self.matcher.clone(), self.include_empty_dirs);
        let runner = Runner::new(
            self.ops.clone(),
            self.translator.clone(),
            self.normalizer.clone(),
            self.config.concurrency,
        );
        let mut executor = SyncExecutor::new(runner, self.config.max_retries);

        for error in &found.errors {
            self.shared.emit(WatchEvent::from_error(error));
        }

        if self.initial_copy {
            let entries: Vec<_> = found
                .actions
                .into_iter()
                .filter(|classified| filter.accepts(classified))
                .map(|classified| (classified.path, ActionKind::Add))
                .collect();

            if !entries.is_empty() {
                debug!("Initial copy of {} entries", entries.len());
                let outcomes = executor.runner().run(entries).await;
                for event in executor.settle_initial(outcomes) {
                    self.shared.emit(event);
                }
            }
        }

        let raw_rx = self.raw_rx.lock().take().ok_or(WatchError::AlreadyOpened)?;

        if !self.shared.set_state(WatchState::Ready) {
            return Err(WatchError::Closed);
        }
        self.shared.emit(WatchEvent::Ready);
        info!("Watcher ready ({} directories)", classifier.registry().len());

        let engine = Engine {
            classifier,
            executor,
            filter,
            queue: EventQueue::new(),
            debouncer: Debouncer::new(Duration::from_millis(self.config.debounce_ms)),
            raw_rx,
            shared: self.shared.clone(),
        };
        *self.task.lock() = Some(tokio::spawn(engine.run()));

        Ok(())
    }

    /// Stop watching
    ///
    /// Releases every OS watch and stops the event loop. Copies already in
    /// flight finish, but no event is emitted after this returns. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.write();
            if *state == WatchState::Closed {
                return;
            }
            *state = WatchState::Closed;
        }

        self.backend.lock().take();
        self.shared.set_pending(false);
        self.shared.shutdown.notify_one();
        // The loop exits on its own; dropping the handle detaches it
        self.task.lock().take();

        info!("Watcher closed");
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.close();
    }
}
