//! Per-trace lifecycle FSM — spec.md §4.5 (C6).
//!
//! Exists to close a race where a span arrives mid-evaluation: without an
//! explicit `Complete`/`Evaluating` state, the evaluator could observe a
//! trace that grew underneath it.

use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    Open,
    Complete,
    Evaluating,
    Done,
}

/// The trace FSM itself. A single instance guards one trace's state and is
/// meant to sit behind the per-trace lock described in spec.md §5.
#[derive(Debug, Clone, Copy)]
pub struct TraceFsm {
    state: TraceState,
}

impl Default for TraceFsm {
    fn default() -> Self {
        Self {
            state: TraceState::Open,
        }
    }
}

impl TraceFsm {
    pub fn state(&self) -> TraceState {
        self.state
    }

    /// `AddSpan` — only legal in `Open`; anything else is `TraceClosed`
    /// reported to the caller (spec.md §4.5: "the OTLP receiver decides to
    /// drop or log").
    pub fn add_span(&self) -> Result<(), IngestError> {
        match self.state {
            TraceState::Open => Ok(()),
            _ => Err(IngestError::TraceClosed),
        }
    }

    /// `Timeout` or `EndOfTrace` — moves `Open -> Complete`. A no-op if
    /// already past `Open` (idempotent promotion, since the scanner and a
    /// forced TTL close can race to call this).
    pub fn close(&mut self) {
        if self.state == TraceState::Open {
            self.state = TraceState::Complete;
        }
    }

    /// `StartEvaluation` — only legal from `Complete`.
    pub fn start_evaluation(&mut self) -> Result<(), IllegalTrace> {
        if self.state != TraceState::Complete {
            return Err(IllegalTrace {
                from: self.state,
                to: TraceState::Evaluating,
            });
        }
        self.state = TraceState::Evaluating;
        Ok(())
    }

    /// Evaluation finished (successfully or not — spec.md §4.5 "Failure
    /// semantics": the FSM still transitions to `Done` on evaluator error).
    pub fn finish(&mut self) {
        self.state = TraceState::Done;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal trace transition: {from:?} -> {to:?}")]
pub struct IllegalTrace {
    pub from: TraceState,
    pub to: TraceState,
}

impl IllegalTrace {
    pub fn fsm_name() -> &'static str {
        "TraceFsm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_accepts_add_span() {
        let fsm = TraceFsm::default();
        assert!(fsm.add_span().is_ok());
    }

    #[test]
    fn closed_rejects_add_span() {
        let mut fsm = TraceFsm::default();
        fsm.close();
        assert_eq!(fsm.add_span(), Err(IngestError::TraceClosed));
    }

    #[test]
    fn evaluating_rejects_add_span() {
        let mut fsm = TraceFsm::default();
        fsm.close();
        fsm.start_evaluation().unwrap();
        assert_eq!(fsm.add_span(), Err(IngestError::TraceClosed));
    }

    #[test]
    fn start_evaluation_requires_complete() {
        let mut fsm = TraceFsm::default();
        assert!(fsm.start_evaluation().is_err());
    }

    #[test]
    fn finish_is_terminal() {
        let mut fsm = TraceFsm::default();
        fsm.close();
        fsm.start_evaluation().unwrap();
        fsm.finish();
        assert_eq!(fsm.state(), TraceState::Done);
    }
}
