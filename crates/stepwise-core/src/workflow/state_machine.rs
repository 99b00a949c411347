//! Workflow lifecycle transition table.
//!
//! Every status change the orchestrator makes is validated here first. The
//! table is the single authority on which transitions are legal.

use chrono::{DateTime, Utc};
use stepwise_types::workflow::{StampChange, StatusStamps, Transition, WorkflowStatus};
use thiserror::Error;

use WorkflowStatus::*;

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub transition: Transition,
    pub from: &'static [WorkflowStatus],
    pub to: WorkflowStatus,
}

pub const TRANSITIONS: [TransitionRule; 8] = [
    TransitionRule {
        transition: Transition::Start,
        from: &[Created],
        to: Processing,
    },
    TransitionRule {
        transition: Transition::Wait,
        from: &[Processing],
        to: Waiting,
    },
    TransitionRule {
        transition: Transition::Resume,
        from: &[Waiting, Paused],
        to: Processing,
    },
    TransitionRule {
        transition: Transition::Pause,
        from: &[Processing, Waiting],
        to: Paused,
    },
    TransitionRule {
        transition: Transition::Complete,
        from: &[Processing],
        to: Completed,
    },
    TransitionRule {
        transition: Transition::Fail,
        from: &[Processing, Waiting],
        to: Failed,
    },
    TransitionRule {
        transition: Transition::Retry,
        from: &[Failed],
        to: Processing,
    },
    TransitionRule {
        transition: Transition::Cancel,
        from: &[Created, Processing, Waiting, Paused],
        to: Cancelled,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot apply '{transition}' to a workflow in state '{from}'")]
pub struct IllegalTransition {
    pub transition: Transition,
    pub from: WorkflowStatus,
}

pub fn rule(transition: Transition) -> &'static TransitionRule {
    let row = match transition {
        Transition::Start => 0,
        Transition::Wait => 1,
        Transition::Resume => 2,
        Transition::Pause => 3,
        Transition::Complete => 4,
        Transition::Fail => 5,
        Transition::Retry => 6,
        Transition::Cancel => 7,
    };
    &TRANSITIONS[row]
}

/// Destination state of `transition` from `from`, if legal.
pub fn validate(
    transition: Transition,
    from: WorkflowStatus,
) -> Result<WorkflowStatus, IllegalTransition> {
    let rule = rule(transition);
    if rule.from.contains(&from) {
        Ok(rule.to)
    } else {
        Err(IllegalTransition { transition, from })
    }
}

pub fn can_apply(transition: Transition, from: WorkflowStatus) -> bool {
    validate(transition, from).is_ok()
}

/// Transitions legal from `from`, in table order.
pub fn available(from: WorkflowStatus) -> Vec<Transition> {
    TRANSITIONS
        .iter()
        .filter(|rule| rule.from.contains(&from))
        .map(|rule| rule.transition)
        .collect()
}

/// Timestamp columns written together with `transition`.
pub fn stamps(transition: Transition, at: DateTime<Utc>) -> StatusStamps {
    let mut stamps = StatusStamps::default();
    match transition {
        Transition::Pause => stamps.paused_at = StampChange::Set(at),
        Transition::Resume => stamps.paused_at = StampChange::Clear,
        Transition::Complete => stamps.completed_at = StampChange::Set(at),
        Transition::Fail => stamps.failed_at = StampChange::Set(at),
        Transition::Retry => stamps.failed_at = StampChange::Clear,
        Transition::Start | Transition::Wait | Transition::Cancel => {}
    }
    stamps
}
