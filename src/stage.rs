//! Entry lifecycle rules.
//!
//! ```text
//! AskingName ──▶ AwaitingPayment ──▶ InLine
//!      └──────────────────────────────▲
//! ```
//!
//! Every stage may also be removed; removal is the entry leaving the
//! collection and is always permitted. Stages never regress.

use crate::error::{QueueError, Result};
use crate::types::Stage;

/// Whether `from -> to` is a forward edge of the lifecycle.
pub fn is_valid_transition(from: Stage, to: Stage) -> bool {
    matches!(
        (from, to),
        (Stage::AskingName, Stage::AwaitingPayment)
            | (Stage::AskingName, Stage::InLine)
            | (Stage::AwaitingPayment, Stage::InLine)
    )
}

/// Check a stage change. Staying in the same stage is not a transition and passes.
pub fn check_transition(from: Stage, to: Stage) -> Result<()> {
    if from == to || is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(QueueError::InvalidTransition {
            from: Some(from),
            to,
        })
    }
}

/// Entries may only be created in the initial stage.
pub fn check_initial(stage: Stage) -> Result<()> {
    if stage == Stage::AskingName {
        Ok(())
    } else {
        Err(QueueError::InvalidTransition {
            from: None,
            to: stage,
        })
    }
}

/// Whether a sequence of observed stages is a lifecycle path.
pub fn is_valid_path(stages: &[Stage]) -> bool {
    match stages.first() {
        None => true,
        Some(&first) => {
            first == Stage::AskingName
                && stages
                    .windows(2)
                    .all(|w| is_valid_transition(w[0], w[1]))
        }
    }
}
