//! Exploitation techniques as data.
//!
//! A `Script` is an ordered list of typed steps. The `Sequencer` captures
//! the startup leaks, then plays the steps against a `Session` one by one
//! without retrying anything: once a step fails the allocator state on the
//! other side is unknown and the run is over.

use std::collections::HashMap;
use std::fmt;

use crate::leak::{self, LeakLabels};
use crate::menu::{Allocation, Exchange};
use crate::payload::{self, PayloadSpec};
use crate::session::Session;
use crate::timer::TimeoutVal;
use crate::tubes::{Tube, TubesError};
use crate::logging as log;

#[derive(thiserror::Error, Debug)]
pub enum StepError {
    #[error("{0}")]
    Tubes(#[from] TubesError),

    #[error("{0}")]
    Payload(#[from] payload::Error),

    #[error("no allocation is bound to '{0}'")]
    UnboundSlot(String),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("capturing leaks failed: {0}")]
    Leak(#[from] leak::Error),

    #[error("step {index} ({step}) failed: {source}")]
    Step {
        index: usize,
        step: String,
        source: StepError,
    },
}

/// Failure classes an operator cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// the target exited or closed the socket
    Connection,
    /// a prompt never showed up
    Timeout,
    /// a leak could not be read
    Parse,
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Leak(_) => ErrorKind::Parse,
            Error::Step { source: StepError::Tubes(err), .. } if err.is_timeout() => {
                ErrorKind::Timeout
            }
            Error::Step { source: StepError::Tubes(err), .. } if err.is_closed() => {
                ErrorKind::Connection
            }
            Error::Step { .. } => ErrorKind::Other,
        }
    }
}

/// Which allocation a free refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRef {
    Bound(String),
    Index(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Answer(Vec<Exchange>),
    Allocate {
        size: u64,
        data: PayloadSpec,
        label: PayloadSpec,
        /// remember the slot under this name
        bind: Option<String>,
    },
    Free(SlotRef),
    Inspect,
    Quit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Answer(exchanges) => write!(f, "answer {} prompts", exchanges.len()),
            Step::Allocate { size, bind: Some(name), .. } => write!(f, "malloc({:#x}) as {}", size, name),
            Step::Allocate { size, .. } => write!(f, "malloc({:#x})", size),
            Step::Free(SlotRef::Bound(name)) => write!(f, "free({})", name),
            Step::Free(SlotRef::Index(idx)) => write!(f, "free({})", idx),
            Step::Inspect => write!(f, "target"),
            Step::Quit => write!(f, "quit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    pub step: Step,
    /// state reached once this step succeeds
    pub checkpoint: Option<String>,
    /// a timeout here means the target stopped talking to us, not failure
    pub tolerate_silence: bool,
}

/// Where the banner leaks are and which symbol the first one names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakPlan {
    pub labels: LeakLabels,
    pub symbol_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub name: String,
    pub leaks: LeakPlan,
    pub steps: Vec<ScriptStep>,
}

impl Script {
    pub fn new<S: Into<String>>(name: S, leaks: LeakPlan) -> Self {
        Script { name: name.into(), leaks, steps: vec![] }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(ScriptStep { step, checkpoint: None, tolerate_silence: false });
        self
    }

    /// Name the state reached after the most recently added step
    pub fn checkpoint<S: Into<String>>(mut self, name: S) -> Self {
        if let Some(last) = self.steps.last_mut() {
            last.checkpoint = Some(name.into());
        }
        self
    }

    pub fn tolerate_silence(mut self) -> Self {
        if let Some(last) = self.steps.last_mut() {
            last.tolerate_silence = true;
        }
        self
    }

    pub fn answer(self, exchanges: Vec<Exchange>) -> Self {
        self.step(Step::Answer(exchanges))
    }

    pub fn allocate(self, size: u64, data: PayloadSpec, label: PayloadSpec) -> Self {
        self.step(Step::Allocate { size, data, label, bind: None })
    }

    pub fn allocate_as<S: Into<String>>(
        self,
        name: S,
        size: u64,
        data: PayloadSpec,
        label: PayloadSpec
    ) -> Self {
        self.step(Step::Allocate { size, data, label, bind: Some(name.into()) })
    }

    pub fn free<S: Into<String>>(self, name: S) -> Self {
        self.step(Step::Free(SlotRef::Bound(name.into())))
    }

    pub fn free_index(self, idx: u64) -> Self {
        self.step(Step::Free(SlotRef::Index(idx)))
    }

    pub fn inspect(self) -> Self {
        self.step(Step::Inspect)
    }

    pub fn quit(self) -> Self {
        self.step(Step::Quit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Init,
    LeakCaptured,
    Checkpoint(String),
    Interactive,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Init => write!(f, "Init"),
            State::LeakCaptured => write!(f, "LeakCaptured"),
            State::Checkpoint(name) => write!(f, "{}", name),
            State::Interactive => write!(f, "Interactive"),
        }
    }
}

/// What a finished run hands back
pub struct Completed<T: Tube> {
    pub session: Session<T>,
    pub trace: Vec<State>,
    pub bindings: HashMap<String, u64>,
    /// the last step timed out where that was allowed
    pub went_silent: bool,
}

pub struct Sequencer<T: Tube> {
    session: Session<T>,
    relaxed_timeout: TimeoutVal,
    bindings: HashMap<String, u64>,
    trace: Vec<State>,
}

impl<T: Tube> Sequencer<T> {
    /// `relaxed_timeout` replaces the session timeout once the leaks are in
    pub fn new(session: Session<T>, relaxed_timeout: TimeoutVal) -> Self {
        Sequencer {
            session,
            relaxed_timeout,
            bindings: HashMap::new(),
            trace: vec![State::Init],
        }
    }

    pub fn state(&self) -> &State {
        self.trace.last().unwrap_or(&State::Init)
    }

    fn advance(&mut self, state: State) {
        log::debug(format!("{} -> {}", self.state(), state));
        self.trace.push(state);
    }

    fn resolve_slot(&self, slot: &SlotRef) -> Result<u64, StepError> {
        match slot {
            SlotRef::Index(idx) => Ok(*idx),
            SlotRef::Bound(name) => self.bindings.get(name).copied()
                .ok_or_else(|| StepError::UnboundSlot(name.clone())),
        }
    }

    async fn execute(&mut self, step: &Step) -> Result<(), StepError> {
        match step {
            Step::Answer(exchanges) => self.session.answer(exchanges).await?,
            Step::Allocate { size, data, label, bind } => {
                let bases = self.session.bases();
                let req = Allocation {
                    size: *size,
                    data: data.render(&bases)?,
                    label: label.render(&bases)?,
                };
                let slot = self.session.allocate(&req).await?;
                if let Some(name) = bind {
                    log::debug(format!("{} is slot {}", name, slot));
                    self.bindings.insert(name.clone(), slot);
                }
            }
            Step::Free(slot) => {
                let slot = self.resolve_slot(slot)?;
                self.session.free(slot).await?;
            }
            Step::Inspect => {
                let out = self.session.inspect().await?;
                log::info(String::from_utf8_lossy(&out).trim_end());
            }
            Step::Quit => self.session.quit().await?,
        }
        Ok(())
    }

    fn fail(&self, err: Error) -> Error {
        log::error(format!("{}", err));
        log::error(self.session.diagnostic());
        err
    }

    pub async fn run(mut self, script: &Script) -> Result<Completed<T>, Error> {
        log::info(format!("Running '{}' ({} steps)", script.name, script.steps.len()));

        if let Err(err) = self.session.capture(
            &script.leaks.labels,
            script.leaks.symbol_offset
        ).await {
            return Err(self.fail(err.into()));
        }
        self.advance(State::LeakCaptured);

        // later stages are allowed to make the target go quiet
        self.session.set_timeout(self.relaxed_timeout);

        let mut went_silent = false;
        for (index, scripted) in script.steps.iter().enumerate() {
            log::debug(format!("step {}: {}", index, scripted.step));

            match self.execute(&scripted.step).await {
                Ok(()) => {}
                Err(StepError::Tubes(err)) if err.is_timeout() && scripted.tolerate_silence => {
                    log::success(format!("{} got no reply, target is no longer talking to the menu", scripted.step));
                    went_silent = true;
                }
                Err(source) => {
                    let err = Error::Step { index, step: scripted.step.to_string(), source };
                    return Err(self.fail(err));
                }
            }

            if let Some(name) = &scripted.checkpoint {
                self.advance(State::Checkpoint(name.clone()));
            }
            if went_silent {
                break;
            }
        }

        self.advance(State::Interactive);
        log::success(format!("'{}' finished: {}", script.name, self.session.diagnostic()));

        Ok(Completed {
            session: self.session,
            trace: self.trace,
            bindings: self.bindings,
            went_silent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerError;

    fn plan() -> LeakPlan {
        LeakPlan { labels: LeakLabels::default(), symbol_offset: 0 }
    }

    #[test]
    fn builder_attaches_to_last_step() {
        let script = Script::new("t", plan())
            .allocate_as("a", 0x68, PayloadSpec::new(), PayloadSpec::new())
            .checkpoint("Allocated")
            .free("a")
            .tolerate_silence();

        assert_eq!(script.steps.len(), 2);
        assert_eq!(script.steps[0].checkpoint.as_deref(), Some("Allocated"));
        assert!(!script.steps[0].tolerate_silence);
        assert!(script.steps[1].tolerate_silence);
        assert_eq!(script.steps[1].step, Step::Free(SlotRef::Bound("a".into())));
    }

    #[test]
    fn step_display() {
        let step = Step::Allocate {
            size: 0x68,
            data: PayloadSpec::new(),
            label: PayloadSpec::new(),
            bind: Some("dup".into()),
        };
        assert_eq!(step.to_string(), "malloc(0x68) as dup");
        assert_eq!(Step::Free(SlotRef::Index(2)).to_string(), "free(2)");
    }

    #[test]
    fn error_kinds() {
        let timeout = Error::Step {
            index: 0,
            step: "quit".into(),
            source: StepError::Tubes(TubesError::TimerError(TimerError::TimeoutError)),
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let closed = Error::Step {
            index: 0,
            step: "quit".into(),
            source: StepError::Tubes(TubesError::ConnectionClosed("gone".into())),
        };
        assert_eq!(closed.kind(), ErrorKind::Connection);

        let unbound = Error::Step {
            index: 0,
            step: "free(x)".into(),
            source: StepError::UnboundSlot("x".into()),
        };
        assert_eq!(unbound.kind(), ErrorKind::Other);
    }
}
