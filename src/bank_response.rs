//! Bank Response Correlator.
//!
//! A bank credit is identified by its UTR. Internal-transfer settlements claim
//! a bot-confirmed credit by moving it to the internal-transfer marker and
//! release it again on reversal. Both moves are compare-and-set, so two
//! settlements racing for the same UTR cannot both win.

use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::ledger::models::{BankResponse, BankResponseStatus};
use crate::ledger::store::LedgerTx;

const UTR_ALREADY_USED: &str = "UTR is already used";

/// Exact-match lookup of the latest live bank response for `utr`.
pub async fn find_by_utr_and_status<T: LedgerTx + ?Sized>(
    tx: &mut T,
    utr: &str,
    status: Option<&BankResponseStatus>,
) -> AppResult<Option<BankResponse>> {
    tx.find_bank_response_by_utr(utr, status).await
}

/// Move `response` from `from` to `to`. Losing the race is a business error.
pub async fn mark_consumed<T: LedgerTx + ?Sized>(
    tx: &mut T,
    response: &BankResponse,
    from: &BankResponseStatus,
    to: &BankResponseStatus,
) -> AppResult<()> {
    if !tx.transition_bank_response(response.id, from, to).await? {
        warn!(
            bank_response_id = %response.id,
            utr = %response.utr,
            from = %from,
            to = %to,
            "Bank response changed under us"
        );
        return Err(AppError::BadRequest(UTR_ALREADY_USED.to_string()));
    }

    info!(
        bank_response_id = %response.id,
        utr = %response.utr,
        status = %to,
        "Bank response status updated"
    );
    Ok(())
}

/// Claim the bot-confirmed credit behind `utr` for an internal transfer.
pub async fn claim_for_internal_transfer<T: LedgerTx + ?Sized>(
    tx: &mut T,
    utr: &str,
) -> AppResult<BankResponse> {
    let response = find_by_utr_and_status(tx, utr, None)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Bank response not found for UTR {}", utr)))?;

    if !response.is_claimable() {
        return Err(AppError::BadRequest(UTR_ALREADY_USED.to_string()));
    }

    mark_consumed(
        tx,
        &response,
        &BankResponseStatus::Success,
        &BankResponseStatus::InternalTransfer,
    )
    .await?;

    Ok(response)
}

/// Hand a credit claimed by an internal transfer back to the plain success state.
pub async fn release_internal_transfer<T: LedgerTx + ?Sized>(
    tx: &mut T,
    utr: &str,
) -> AppResult<BankResponse> {
    let response = find_by_utr_and_status(tx, utr, Some(&BankResponseStatus::InternalTransfer))
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!("Internal transfer bank response not found for UTR {}", utr))
        })?;

    if response.is_used {
        return Err(AppError::BadRequest(UTR_ALREADY_USED.to_string()));
    }

    mark_consumed(
        tx,
        &response,
        &BankResponseStatus::InternalTransfer,
        &BankResponseStatus::Success,
    )
    .await?;

    Ok(response)
}
