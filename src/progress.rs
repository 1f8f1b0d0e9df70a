use crate::motif::Motif;
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Instant;

/// Exact marker substrings the backend embeds in its free-text progress
/// lines. The whole phase inference lives in [`phase_timing_from_line`];
/// nothing else in the crate matches on these strings.
pub const SETUP_MARKER: &str = "Time cost for loading motif libs";
pub const DISCOVERY_MARKER: &str = "time cost for whole structure";

/// Floor for the displayed setup duration; the backend sometimes reports a
/// sub-resolution time that would render as zero.
pub const MIN_SETUP_SECONDS: f64 = 0.0001;

pub const REDIRECT_COUNTDOWN_START: u32 = 10;

lazy_static! {
    static ref SETUP_TIME_RE: Regex =
        Regex::new(r"Time cost for loading motif libs: ([\d.e-]+) seconds").unwrap();
    static ref DISCOVERY_TIME_RE: Regex =
        Regex::new(r"time cost for whole structure: ([\d.e-]+) seconds").unwrap();
}

/// A timing fact extracted from one progress line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PhaseTiming {
    SetupDone(f64),
    DiscoveryDone(f64),
}

/// The one place that knows the wire markers. Returns `None` for lines that
/// carry no timing information.
pub fn phase_timing_from_line(line: &str) -> Option<PhaseTiming> {
    if line.contains(SETUP_MARKER) {
        let seconds = SETUP_TIME_RE
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())?;
        return Some(PhaseTiming::SetupDone(seconds));
    }
    if line.contains(DISCOVERY_MARKER) {
        let seconds = DISCOVERY_TIME_RE
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())?;
        return Some(PhaseTiming::DiscoveryDone(seconds));
    }
    None
}

/// Durations of the three job phases, in seconds. Each is set at most once
/// and only after its predecessor; out-of-order reports are dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseTimings {
    pub setup: Option<f64>,
    pub discovery: Option<f64>,
    pub rendering: Option<f64>,
}

impl PhaseTimings {
    /// Applies one extracted timing, enforcing the setup -> discovery order.
    /// Returns whether the timing was accepted.
    pub fn record(&mut self, timing: PhaseTiming) -> bool {
        match timing {
            PhaseTiming::SetupDone(seconds) => {
                if self.setup.is_some() {
                    return false;
                }
                self.setup = Some(seconds.max(MIN_SETUP_SECONDS));
                true
            }
            PhaseTiming::DiscoveryDone(seconds) => {
                if self.setup.is_none() || self.discovery.is_some() {
                    return false;
                }
                self.discovery = Some(seconds);
                true
            }
        }
    }
}

/// Post-completion countdown to the results view. Fires at most once, via
/// either the periodic tick or a manual "redirect now".
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectCountdown {
    remaining: u32,
    fired: bool,
}

impl RedirectCountdown {
    pub fn new() -> Self {
        Self {
            remaining: REDIRECT_COUNTDOWN_START,
            fired: false,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// One-second tick. Returns `true` exactly when the redirect should
    /// happen now.
    pub fn tick(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.fired = true;
            return true;
        }
        false
    }

    /// Manual override; a no-op if the countdown already fired.
    pub fn fire_now(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;
        true
    }
}

impl Default for RedirectCountdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionPhase {
    Idle,
    Submitting,
    Succeeded,
    Failed,
    Cancelled,
}

/// View model for one submission attempt: raw progress log, derived phase
/// display, final result and the redirect countdown.
#[derive(Debug)]
pub struct ProgressTracker {
    phase: SubmissionPhase,
    progress_log: Vec<String>,
    timings: PhaseTimings,
    discovery_done_at: Option<Instant>,
    result: Option<Vec<Motif>>,
    error: Option<String>,
    countdown: Option<RedirectCountdown>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            phase: SubmissionPhase::Idle,
            progress_log: Vec::new(),
            timings: PhaseTimings::default(),
            discovery_done_at: None,
            result: None,
            error: None,
            countdown: None,
        }
    }

    pub fn phase(&self) -> SubmissionPhase {
        self.phase
    }

    pub fn progress_log(&self) -> &[String] {
        &self.progress_log
    }

    pub fn timings(&self) -> PhaseTimings {
        self.timings
    }

    pub fn result(&self) -> Option<&[Motif]> {
        self.result.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn redirect_remaining(&self) -> Option<u32> {
        self.countdown.as_ref().map(RedirectCountdown::remaining)
    }

    /// Starts a fresh attempt, dropping every trace of the previous one.
    pub fn begin(&mut self) {
        *self = Self::new();
        self.phase = SubmissionPhase::Submitting;
    }

    pub fn record_progress(&mut self, line: &str) {
        self.record_progress_at(line, Instant::now());
    }

    fn record_progress_at(&mut self, line: &str, now: Instant) {
        if self.phase != SubmissionPhase::Submitting {
            return;
        }
        self.progress_log.push(line.to_string());
        if let Some(timing) = phase_timing_from_line(line) {
            let accepted = self.timings.record(timing);
            if accepted && matches!(timing, PhaseTiming::DiscoveryDone(_)) {
                self.discovery_done_at = Some(now);
            }
        }
    }

    pub fn complete(&mut self, motifs: Vec<Motif>) {
        self.complete_at(motifs, Instant::now());
    }

    fn complete_at(&mut self, motifs: Vec<Motif>, now: Instant) {
        if self.phase != SubmissionPhase::Submitting {
            return;
        }
        if let Some(done_at) = self.discovery_done_at {
            if self.timings.discovery.is_some() && self.timings.rendering.is_none() {
                self.timings.rendering = Some(now.duration_since(done_at).as_secs_f64());
            }
        }
        self.result = Some(motifs);
        self.phase = SubmissionPhase::Succeeded;
        self.countdown = Some(RedirectCountdown::new());
    }

    pub fn fail(&mut self, message: &str) {
        if self.phase != SubmissionPhase::Submitting {
            return;
        }
        self.error = Some(message.to_string());
        self.phase = SubmissionPhase::Failed;
    }

    /// User cancellation: quiet reset so the next attempt starts clean.
    pub fn cancel(&mut self) {
        *self = Self::new();
        self.phase = SubmissionPhase::Cancelled;
    }

    /// Advances the countdown by one second. `true` means redirect now.
    pub fn tick_redirect(&mut self) -> bool {
        match self.countdown.as_mut() {
            Some(countdown) => countdown.tick(),
            None => false,
        }
    }

    /// Manual "redirect now"; shares single-fire semantics with the tick.
    pub fn redirect_now(&mut self) -> bool {
        match self.countdown.as_mut() {
            Some(countdown) => countdown.fire_now(),
            None => false,
        }
    }

    pub fn headline(&self) -> String {
        match self.phase {
            SubmissionPhase::Idle => "Waiting for a structure".to_string(),
            SubmissionPhase::Submitting => "Processing".to_string(),
            SubmissionPhase::Succeeded => match self.result.as_deref() {
                Some([]) | None => {
                    "No Undesignable Motifs Found in the Input Structure!".to_string()
                }
                Some(motifs) => {
                    format!("Found {} Motifs in the Input Structure", motifs.len())
                }
            },
            SubmissionPhase::Failed => format!(
                "Processing failed: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
            SubmissionPhase::Cancelled => "Cancelled".to_string(),
        }
    }

    /// The simple phase-by-phase summary, mirroring the raw log's information
    /// without exposing backend line noise.
    pub fn display_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match self.timings.setup {
            None => lines.push("Setting up environment and loading libraries ...".to_string()),
            Some(seconds) => lines.push(format!(
                "Setting up environment and loading libraries done in {seconds:.4} seconds"
            )),
        }
        if self.timings.setup.is_some() {
            match self.timings.discovery {
                None => lines.push("Finding undesignable motifs ...".to_string()),
                Some(seconds) => {
                    lines.push(format!("Undesignable motifs found in {seconds:.4} seconds"))
                }
            }
        }
        if self.timings.discovery.is_some() {
            match self.timings.rendering {
                None => lines.push("Creating plots ...".to_string()),
                Some(seconds) => {
                    lines.push(format!("Creating plots done in {seconds:.4} seconds"))
                }
            }
        }
        lines
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
