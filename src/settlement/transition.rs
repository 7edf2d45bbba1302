//! Settlement state machine.
//!
//! `INITIATED -> {SUCCESS, REJECTED}`, `SUCCESS -> REVERSED`. A rejected
//! settlement never moved money and can never be approved again.

use crate::error::{AppError, AppResult};
use crate::ledger::models::{Settlement, SettlementStatus, UpdateSettlementRequest};

/// What an update request asks the engine to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Reference (UTR) supplied: realize the settlement on the ledger
    Approve,
    /// Rejection reason supplied: no ledger effect
    Reject,
    /// `INITIATED` (or `REVERSED`) requested: undo an approval
    Reverse,
    /// Explicit status with no ledger meaning
    Mark(SettlementStatus),
    /// No status change, only amount/config
    Amend,
}

impl Transition {
    pub fn target_status(&self) -> Option<SettlementStatus> {
        match self {
            Transition::Approve => Some(SettlementStatus::Success),
            Transition::Reject => Some(SettlementStatus::Rejected),
            Transition::Reverse => Some(SettlementStatus::Reversed),
            Transition::Mark(status) => Some(*status),
            Transition::Amend => None,
        }
    }

    pub fn moves_ledger(&self) -> bool {
        matches!(self, Transition::Approve | Transition::Reverse)
    }
}

/// Work out the transition `request` asks for on `current` and check it is
/// legal. Nothing is written.
pub fn plan(current: &Settlement, request: &UpdateSettlementRequest) -> AppResult<Transition> {
    reject_duplicate_reference(current, request)?;

    if current.status == SettlementStatus::Rejected
        && request.status == Some(SettlementStatus::Success)
    {
        return Err(rejected_to_approved());
    }

    let transition = if request.config.has_rejection() {
        Transition::Reject
    } else if request.config.has_reference() {
        Transition::Approve
    } else {
        match request.status {
            Some(SettlementStatus::Initiated) | Some(SettlementStatus::Reversed) => Transition::Reverse,
            Some(SettlementStatus::Success) => {
                return Err(AppError::Validation(
                    "reference_id is required to approve a settlement".to_string(),
                ))
            }
            Some(SettlementStatus::Rejected) => {
                return Err(AppError::Validation(
                    "rejected_reason is required to reject a settlement".to_string(),
                ))
            }
            Some(status) => Transition::Mark(status),
            None => Transition::Amend,
        }
    };

    guard(current.status, transition)?;
    Ok(transition)
}

/// Re-sending the reference a settlement already carries is refused, unless
/// it is the empty reference sent alongside a rejection.
fn reject_duplicate_reference(
    current: &Settlement,
    request: &UpdateSettlementRequest,
) -> AppResult<()> {
    let Some(reference) = request.config.reference_id.as_deref() else {
        return Ok(());
    };

    if current.config.reference_id.as_deref() == Some(reference)
        && (!reference.is_empty() || !request.config.has_rejection())
    {
        return Err(AppError::BadRequest("UTR already exists".to_string()));
    }

    Ok(())
}

fn guard(current: SettlementStatus, transition: Transition) -> AppResult<()> {
    let Some(target) = transition.target_status() else {
        return Ok(());
    };

    if current == SettlementStatus::Rejected && target == SettlementStatus::Success {
        return Err(rejected_to_approved());
    }

    if current == target {
        return Err(AppError::BadRequest(
            "Settlement status cannot be updated to the same value".to_string(),
        ));
    }

    if transition == Transition::Reject && current != SettlementStatus::Initiated {
        return Err(AppError::BadRequest(format!(
            "Only initiated settlements can be rejected, settlement is {}",
            current
        )));
    }

    if transition == Transition::Reverse && current != SettlementStatus::Success {
        return Err(AppError::BadRequest(format!(
            "Only successful settlements can be reversed, settlement is {}",
            current
        )));
    }

    Ok(())
}

fn rejected_to_approved() -> AppError {
    AppError::BadRequest("Cannot change settlement status from rejected to approved".to_string())
}
