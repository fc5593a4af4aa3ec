use std::fmt;

use crate::dom::Dom;
use crate::scheduler::TimerId;
use crate::Result;

/// One idempotent rewrite of the page. Running a pass twice with no outside
/// mutation in between must leave the second run a no-op.
pub trait ConvergencePass: fmt::Debug {
    fn name(&self) -> &str;
    fn apply(&mut self, dom: &mut Dom) -> Result<PassReport>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub text_rewrites: usize,
    pub attribute_rewrites: usize,
    pub removed_labels: Vec<String>,
    pub containers_removed: usize,
}

impl PassReport {
    pub fn change_count(&self) -> usize {
        self.text_rewrites
            + self.attribute_rewrites
            + self.removed_labels.len()
            + self.containers_removed
    }

    pub fn is_noop(&self) -> bool {
        self.change_count() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Polling for the readiness container.
    Waiting,
    Applying,
    /// Ready; child-list mutations schedule a debounced re-run.
    Observing,
    /// Polling gave up before the container filled.
    TimedOut,
    /// A pass returned an error; the engine stops reacting.
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Waiting => "waiting",
            Self::Applying => "applying",
            Self::Observing => "observing",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStatus {
    pub id: EngineId,
    pub name: String,
    pub state: EngineState,
    pub poll_attempts: u32,
    pub passes: u32,
    pub pending_timer: Option<TimerId>,
    pub last_report: Option<PassReport>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Ready,
    Retry,
    TimedOut,
}

#[derive(Debug)]
pub(crate) struct Engine {
    id: EngineId,
    pass: Box<dyn ConvergencePass>,
    state: EngineState,
    poll_attempts: u32,
    passes: u32,
    pub(crate) pending: Option<TimerId>,
    last_report: Option<PassReport>,
    last_error: Option<String>,
}

impl Engine {
    pub(crate) fn new(id: EngineId, pass: Box<dyn ConvergencePass>) -> Self {
        Self {
            id,
            pass,
            state: EngineState::Waiting,
            poll_attempts: 0,
            passes: 0,
            pending: None,
            last_report: None,
            last_error: None,
        }
    }

    pub(crate) fn id(&self) -> EngineId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        self.pass.name()
    }

    pub(crate) fn state(&self) -> EngineState {
        self.state
    }

    pub(crate) fn poll_attempts(&self) -> u32 {
        self.poll_attempts
    }

    /// Records one readiness check. `Retry` means another poll should be
    /// scheduled.
    pub(crate) fn on_poll(&mut self, ready: bool, max_attempts: u32) -> PollOutcome {
        if self.state != EngineState::Waiting {
            return PollOutcome::Retry;
        }
        self.poll_attempts += 1;
        if ready {
            PollOutcome::Ready
        } else if self.poll_attempts >= max_attempts {
            self.state = EngineState::TimedOut;
            PollOutcome::TimedOut
        } else {
            PollOutcome::Retry
        }
    }

    pub(crate) fn run_pass(&mut self, dom: &mut Dom) -> Result<PassReport> {
        self.state = EngineState::Applying;
        match self.pass.apply(dom) {
            Ok(report) => {
                self.state = EngineState::Observing;
                self.passes += 1;
                self.last_report = Some(report.clone());
                Ok(report)
            }
            Err(err) => {
                self.state = EngineState::Failed;
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }

    pub(crate) fn status(&self) -> EngineStatus {
        EngineStatus {
            id: self.id,
            name: self.pass.name().to_string(),
            state: self.state,
            poll_attempts: self.poll_attempts,
            passes: self.passes,
            pending_timer: self.pending,
            last_report: self.last_report.clone(),
            last_error: self.last_error.clone(),
        }
    }
}
