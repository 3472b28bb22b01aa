//! Admission policy: who may claim a slot, and which stage follows the name.
//!
//! The policy is a `Copy` view over [`AdmissionSettings`]; it performs no
//! locking of its own. [`StateCache`](crate::StateCache) evaluates it under
//! its exclusive lock so a check and the mutation it guards are atomic.

use crate::error::{QueueError, Result};
use crate::stage;
use crate::types::{AdmissionSettings, SessionId, Stage};

/// Pure admission decisions over one settings value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionPolicy {
    settings: AdmissionSettings,
}

impl AdmissionPolicy {
    pub fn new(settings: AdmissionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> AdmissionSettings {
        self.settings
    }

    pub fn is_open(&self) -> bool {
        self.settings.open
    }

    pub fn requires_payment(&self) -> bool {
        self.settings.price > 0
    }

    /// True iff signups are open and `held` (pending+active entries) is below the limit.
    pub fn can_admit(&self, held: usize) -> bool {
        self.is_open() && held < self.settings.limit as usize
    }

    /// Like [`can_admit`](Self::can_admit) but names the reason for a denial.
    pub fn admit(&self, session: SessionId, held: usize) -> Result<()> {
        if !self.is_open() {
            return Err(QueueError::SignupsClosed);
        }
        if held >= self.settings.limit as usize {
            return Err(QueueError::LimitReached {
                session,
                limit: self.settings.limit,
            });
        }
        Ok(())
    }

    /// Stage an entry moves to once its name is confirmed.
    pub fn stage_after_name(&self) -> Stage {
        if self.requires_payment() {
            Stage::AwaitingPayment
        } else {
            Stage::InLine
        }
    }

    /// Lifecycle check plus payment gating: `AwaitingPayment` is only
    /// reachable while a price is set, and a paid event cannot skip it.
    pub fn check_transition(&self, from: Stage, to: Stage) -> Result<()> {
        stage::check_transition(from, to)?;
        let skips_payment = from == Stage::AskingName && to == Stage::InLine;
        let pays_for_free = from != to && to == Stage::AwaitingPayment;
        if (skips_payment && self.requires_payment())
            || (pays_for_free && !self.requires_payment())
        {
            return Err(QueueError::InvalidTransition {
                from: Some(from),
                to,
            });
        }
        Ok(())
    }
}

/// Reject settings the cache cannot operate with.
pub fn validate_settings(settings: &AdmissionSettings) -> Result<()> {
    if settings.limit == 0 {
        return Err(QueueError::InvalidSetting(
            "limit must be at least 1".into(),
        ));
    }
    Ok(())
}
