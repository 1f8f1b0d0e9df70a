use crate::dot_bracket::CandidateStructure;
use crate::motif::Motif;
use crate::progress::ProgressTracker;
use crate::submission::{self, CancelToken, SubmissionError};
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

/// Updates a running submission attempt delivers to its owner, in order.
/// Exactly one terminal update (`Finished`/`Failed`/`Aborted`) is sent.
#[derive(Debug)]
pub enum SessionUpdate {
    Progress(String),
    Finished(Vec<Motif>),
    Failed(String),
    Aborted,
}

/// The work one attempt performs: receives a progress sink and the attempt's
/// cancellation token. Swappable so tests can run without a backend.
pub type SubmissionJob = Box<
    dyn FnOnce(&mut dyn FnMut(&str), &CancelToken) -> Result<Vec<Motif>, SubmissionError> + Send,
>;

/// One in-flight submission attempt. Owns the worker thread, the update
/// channel and the cancellation token; dropping the session cancels the
/// token, so a newly started attempt implicitly abandons its predecessor.
pub struct SubmissionSession {
    token: CancelToken,
    updates: Receiver<SessionUpdate>,
    worker: Option<JoinHandle<()>>,
    finished: bool,
}

impl SubmissionSession {
    /// Starts the attempt against the configured analysis backend.
    pub fn begin(structure: CandidateStructure) -> Self {
        Self::begin_with(Box::new(move |on_progress, token| {
            submission::submit(&structure, on_progress, token)
        }))
    }

    pub fn begin_with(job: SubmissionJob) -> Self {
        let token = CancelToken::new();
        let worker_token = token.clone();
        let (sender, updates) = channel();
        let worker = thread::spawn(move || {
            let progress_sender = sender.clone();
            let mut on_progress = move |line: &str| {
                let _ = progress_sender.send(SessionUpdate::Progress(line.to_string()));
            };
            let terminal = match job(&mut on_progress, &worker_token) {
                Ok(motifs) => SessionUpdate::Finished(motifs),
                Err(e) if e.is_aborted() => SessionUpdate::Aborted,
                Err(e) => SessionUpdate::Failed(e.to_string()),
            };
            let _ = sender.send(terminal);
        });
        Self {
            token,
            updates,
            worker: Some(worker),
            finished: false,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Requests cancellation. Safe to call repeatedly or after completion.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn apply(&mut self, update: SessionUpdate, tracker: &mut ProgressTracker) {
        match update {
            SessionUpdate::Progress(line) => tracker.record_progress(&line),
            SessionUpdate::Finished(motifs) => {
                tracker.complete(motifs);
                self.finished = true;
            }
            SessionUpdate::Failed(message) => {
                tracker.fail(&message);
                self.finished = true;
            }
            SessionUpdate::Aborted => {
                tracker.cancel();
                self.finished = true;
            }
        }
    }

    /// A dropped channel before any terminal update means the worker died
    /// (panicked); without this the attempt would look in-flight forever.
    fn worker_vanished(&mut self, tracker: &mut ProgressTracker) {
        if !self.finished {
            tracker.fail("Analysis worker exited without reporting a result");
            self.finished = true;
        }
    }

    /// Drains every pending update into the tracker without blocking.
    /// Returns `true` once the attempt reached a terminal state.
    pub fn poll(&mut self, tracker: &mut ProgressTracker) -> bool {
        loop {
            match self.updates.try_recv() {
                Ok(update) => self.apply(update, tracker),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.worker_vanished(tracker);
                    break;
                }
            }
        }
        self.finished
    }

    /// Blocks until the terminal update arrives, feeding the tracker along
    /// the way, then reaps the worker thread.
    pub fn wait(mut self, tracker: &mut ProgressTracker) {
        while !self.finished {
            match self.updates.recv() {
                Ok(update) => self.apply(update, tracker),
                Err(_) => self.worker_vanished(tracker),
            }
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for SubmissionSession {
    fn drop(&mut self) {
        // The worker is abandoned, not joined; it observes the cancelled
        // token within one poll interval and exits on its own.
        self.token.cancel();
    }
}
