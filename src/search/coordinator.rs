//! SearchCoordinator - one cancellable search at a time
//!
//! The worker thread enumerates and matches; everything it finds travels over
//! a channel tagged with its run id. The host thread drains that channel in
//! [`SearchCoordinator::pump`] / [`SearchCoordinator::wait`], so callbacks and
//! events always fire on the host, and messages from superseded runs are
//! dropped.

use std::collections::{BTreeSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use super::enumerator::{EnumerateOptions, FileEnumerator};
use super::matcher::{scan_file, LineMatcher};
use super::{ErrorCode, FileMatch, PathPattern, SearchMode, SearchOptions, SearchOutcome};
use crate::core::{CancelToken, Progress, ProgressCounters, RunId};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};

/// Finished outcomes kept around for late `on_complete` registrations
const FINISHED_KEPT: usize = 8;

/// Handle of one search run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunHandle {
    id: RunId,
}

impl RunHandle {
    pub fn id(&self) -> RunId {
        self.id
    }
}

enum WorkerMessage {
    FileMatches {
        run: RunId,
        path: PathBuf,
        matches: Vec<FileMatch>,
    },
    Finished {
        run: RunId,
        roots: BTreeSet<PathBuf>,
        error_code: ErrorCode,
        completed: bool,
    },
}

type CompleteCallback = Box<dyn FnOnce(&SearchOutcome)>;

/// A worker thread, possibly still running
struct Worker {
    run: RunId,
    thread: JoinHandle<()>,
    /// Disconnects when the worker exits
    done: Receiver<()>,
}

struct ActiveRun {
    id: RunId,
    cancel: CancelToken,
    progress: Arc<ProgressCounters>,
    outcome: SearchOutcome,
    callbacks: Vec<CompleteCallback>,
}

/// Runs searches on a background worker and reports on the host thread
pub struct SearchCoordinator {
    name: String,
    events: EventBus,
    join_timeout: Duration,
    tx: Sender<WorkerMessage>,
    rx: Receiver<WorkerMessage>,
    active: Option<ActiveRun>,
    workers: Vec<Worker>,
    finished: VecDeque<(RunId, SearchOutcome)>,
}

impl SearchCoordinator {
    pub fn new(name: impl Into<String>, events: EventBus) -> Self {
        let (tx, rx) = unbounded();
        Self {
            name: name.into(),
            events,
            join_timeout: Duration::from_secs(2),
            tx,
            rx,
            active: None,
            workers: Vec::new(),
            finished: VecDeque::new(),
        }
    }

    /// Bound on waiting for a superseded worker to exit
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a new run, cancelling the previous one.
    ///
    /// Fails with `InvalidPattern` when an include/exclude pattern is neither
    /// a regex nor a glob, and `InvalidArgument` when the root is unusable.
    pub fn begin(&mut self, options: SearchOptions) -> Result<RunHandle> {
        let include = PathPattern::compile(&options.include_pattern)?.map(Arc::new);
        let exclude = PathPattern::compile(&options.exclude_pattern)?.map(Arc::new);

        let mode = options.mode();
        let root = match mode {
            SearchMode::RuntimePath => options.root_path.clone(),
            SearchMode::Walk | SearchMode::VcsManifest => {
                options.root_path.canonicalize().map_err(|e| {
                    Error::InvalidArgument(format!(
                        "cannot search {}: {}",
                        options.root_path.display(),
                        e
                    ))
                })?
            }
        };

        if let Some(previous) = self.active.as_ref().map(|run| run.id) {
            self.cancel(RunHandle { id: previous });
        }
        self.reap_workers(self.join_timeout);

        let id = RunId::next();
        let cancel = CancelToken::new();
        let progress = Arc::new(ProgressCounters::default());
        let (done_tx, done_rx) = bounded::<()>(0);

        let job = SearchJob {
            run: id,
            enumerate: EnumerateOptions {
                root,
                mode,
                include,
                exclude,
                runtime_path: options.runtime_path.clone(),
                runtime_path_env: options.runtime_path_env.clone(),
            },
            options,
            cancel: cancel.clone(),
            progress: Arc::clone(&progress),
            tx: self.tx.clone(),
        };

        let thread = thread::Builder::new()
            .name(format!("{}-search", self.name))
            .spawn(move || {
                let _done = done_tx;
                job.run();
            })
            .map_err(|e| Error::Internal(format!("cannot spawn search worker: {}", e)))?;

        info!("{}: started search {}", self.name, id);

        self.workers.push(Worker {
            run: id,
            thread,
            done: done_rx,
        });
        self.active = Some(ActiveRun {
            id,
            cancel,
            progress,
            outcome: SearchOutcome::default(),
            callbacks: Vec::new(),
        });

        Ok(RunHandle { id })
    }

    /// Cancel a run. Idempotent; once it returns no more callbacks fire for
    /// `handle`, and pending `on_complete` callbacks have received the partial
    /// outcome with `completed == false`.
    pub fn cancel(&mut self, handle: RunHandle) {
        let is_active = self.active.as_ref().map(|run| run.id) == Some(handle.id);
        if !is_active {
            return;
        }

        // Take whatever the worker already produced
        self.pump();

        if let Some(run) = self.active.as_ref() {
            if run.id == handle.id {
                run.cancel.cancel();
                debug!("{}: cancelled {}", self.name, handle.id);
                self.finish(BTreeSet::new(), ErrorCode::None, false);
            }
        }
    }

    /// Register a callback for the final outcome of `handle`.
    ///
    /// Fires immediately if the run has already finished.
    pub fn on_complete<F>(&mut self, handle: RunHandle, callback: F)
    where
        F: FnOnce(&SearchOutcome) + 'static,
    {
        if let Some(run) = self.active.as_mut().filter(|run| run.id == handle.id) {
            run.callbacks.push(Box::new(callback));
            return;
        }
        match self.finished.iter().find(|(id, _)| *id == handle.id) {
            Some((_, outcome)) => callback(outcome),
            None => warn!("{}: on_complete for unknown {}", self.name, handle.id),
        }
    }

    /// Approximate progress of a live run
    pub fn progress(&self, handle: RunHandle) -> Option<Progress> {
        self.active
            .as_ref()
            .filter(|run| run.id == handle.id)
            .map(|run| run.progress.snapshot())
    }

    pub fn is_running(&self, handle: RunHandle) -> bool {
        self.active.as_ref().map(|run| run.id) == Some(handle.id)
    }

    /// Final outcome of a finished run, if still remembered
    pub fn outcome(&self, handle: RunHandle) -> Option<&SearchOutcome> {
        self.finished
            .iter()
            .find(|(id, _)| *id == handle.id)
            .map(|(_, outcome)| outcome)
    }

    /// Deliver everything the worker has sent so far, without blocking.
    /// Returns the number of messages handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        let mut updated = false;
        while let Ok(message) = self.rx.try_recv() {
            handled += 1;
            updated |= self.handle(message);
        }
        if updated {
            self.emit_update();
        }
        handled
    }

    /// Block the host until `handle` finishes or `timeout` elapses.
    pub fn wait(&mut self, handle: RunHandle, timeout: Duration) -> Option<SearchOutcome> {
        let deadline = Instant::now() + timeout;
        while self.is_running(handle) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(message) => {
                    if self.handle(message) {
                        self.emit_update();
                    }
                }
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.outcome(handle).cloned()
    }

    /// Convenience: start a search and block until it is done
    pub fn run_to_completion(
        &mut self,
        options: SearchOptions,
        timeout: Duration,
    ) -> Result<SearchOutcome> {
        let handle = self.begin(options)?;
        match self.wait(handle, timeout) {
            Some(outcome) => Ok(outcome),
            None => {
                self.cancel(handle);
                self.outcome(handle)
                    .cloned()
                    .ok_or_else(|| Error::Internal("search outcome lost".to_string()))
            }
        }
    }

    /// Returns true when the active outcome gained matches
    fn handle(&mut self, message: WorkerMessage) -> bool {
        match message {
            WorkerMessage::FileMatches { run, path, matches } => {
                match self.active.as_mut().filter(|active| active.id == run) {
                    Some(active) => {
                        active.outcome.add_file(path, matches);
                        true
                    }
                    None => false,
                }
            }
            WorkerMessage::Finished {
                run,
                roots,
                error_code,
                completed,
            } => {
                if self.active.as_ref().map(|active| active.id) == Some(run) {
                    self.finish(roots, error_code, completed);
                }
                false
            }
        }
    }

    fn emit_update(&self) {
        if let Some(active) = self.active.as_ref() {
            self.events
                .emit(Event::SearchMatchesUpdated(active.outcome.clone()));
        }
    }

    /// Close the active run and notify everyone once
    fn finish(&mut self, roots: BTreeSet<PathBuf>, error_code: ErrorCode, completed: bool) {
        let Some(mut run) = self.active.take() else {
            return;
        };

        run.outcome.roots_scanned.extend(roots);
        run.outcome.error_code = run.outcome.error_code.merge(error_code);
        run.outcome.completed = completed;

        info!(
            "{}: {} finished - {} matches in {} files (completed={}, error={})",
            self.name,
            run.id,
            run.outcome.total_match_count,
            run.outcome.file_count(),
            completed,
            run.outcome.error_code
        );

        for callback in run.callbacks.drain(..) {
            callback(&run.outcome);
        }
        self.events.emit(Event::SearchComplete {
            outcome: run.outcome.clone(),
            completed,
        });

        self.finished.push_back((run.id, run.outcome));
        while self.finished.len() > FINISHED_KEPT {
            self.finished.pop_front();
        }
    }

    /// Join exited workers; wait up to `timeout` for the others, then
    /// abandon them.
    fn reap_workers(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        for worker in std::mem::take(&mut self.workers) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match worker.done.recv_timeout(remaining) {
                Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                    if worker.thread.join().is_err() {
                        warn!("{}: worker for {} panicked", self.name, worker.run);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "{}: worker for {} did not stop in time, abandoning it",
                        self.name, worker.run
                    );
                }
            }
        }
    }
}

impl Drop for SearchCoordinator {
    fn drop(&mut self) {
        if let Some(run) = self.active.as_ref() {
            run.cancel.cancel();
        }
        self.reap_workers(self.join_timeout);
    }
}

/// Everything a worker thread owns
struct SearchJob {
    run: RunId,
    options: SearchOptions,
    enumerate: EnumerateOptions,
    cancel: CancelToken,
    progress: Arc<ProgressCounters>,
    tx: Sender<WorkerMessage>,
}

impl SearchJob {
    fn run(self) {
        let run = self.run;
        let tx = self.tx.clone();
        let result = catch_unwind(AssertUnwindSafe(|| self.search()));
        let (roots, error_code, completed) = match result {
            Ok(summary) => summary,
            Err(_) => {
                warn!("Search worker for {} panicked", run);
                (BTreeSet::new(), ErrorCode::Internal, false)
            }
        };
        let _ = tx.send(WorkerMessage::Finished {
            run,
            roots,
            error_code,
            completed,
        });
    }

    fn search(&self) -> (BTreeSet<PathBuf>, ErrorCode, bool) {
        let matcher = match LineMatcher::new(&self.options.needles, self.options.needle_is_regex)
        {
            Ok(matcher) => matcher,
            Err(e) => {
                warn!("Search {} rejected: {}", self.run, e);
                return (BTreeSet::new(), ErrorCode::InvalidRegex, false);
            }
        };

        let enumerator = match FileEnumerator::new(&self.enumerate, self.cancel.clone()) {
            Ok(enumerator) => enumerator,
            Err(Error::NoVcsRoot(path)) => {
                warn!("No version control root above {}", path.display());
                return (BTreeSet::new(), ErrorCode::NoVcsRoot, false);
            }
            Err(e) => {
                warn!("Cannot enumerate files: {}", e);
                return (BTreeSet::new(), ErrorCode::Internal, false);
            }
        };
        let roots: BTreeSet<PathBuf> = enumerator.roots().iter().cloned().collect();

        let mut error_code = ErrorCode::None;
        for candidate in enumerator {
            if self.cancel.is_cancelled() {
                break;
            }
            let path = match candidate {
                Ok(path) => path,
                Err(_) => {
                    error_code = error_code.merge(ErrorCode::PermissionDenied);
                    continue;
                }
            };

            match scan_file(
                &path,
                &matcher,
                &self.options.supported_encodings,
                &self.cancel,
            ) {
                Ok(matches) => {
                    self.progress.file_done(matches.len());
                    if !matches.is_empty()
                        && self
                            .tx
                            .send(WorkerMessage::FileMatches {
                                run: self.run,
                                path,
                                matches,
                            })
                            .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Cannot read {}: {}", path.display(), e);
                    error_code = error_code.merge(ErrorCode::PermissionDenied);
                }
            }
        }

        let completed = !self.cancel.is_cancelled();
        (roots, error_code, completed)
    }
}
