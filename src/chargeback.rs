//! Chargeback Engine
//!
//! A chargeback debits the ledgers of both the merchant and the vendor behind
//! a PayIn. All writes go through the caller's transaction.

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::ledger::models::*;
use crate::ledger::store::LedgerTx;

#[derive(Debug, Clone, Copy, Default)]
pub struct ChargebackEngine;

impl ChargebackEngine {
    pub fn new() -> Self {
        Self
    }

    /// Insert a chargeback against `payin` and debit both parties' ledgers.
    pub async fn create<T: LedgerTx + ?Sized>(
        &self,
        tx: &mut T,
        payin: &PayIn,
        request: &CreateChargeBackRequest,
        actor: &Actor,
    ) -> AppResult<ChargeBack> {
        if request.amount <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Chargeback amount must be positive, got {}",
                request.amount
            )));
        }

        let chargeback = tx
            .insert_chargeback(&NewChargeBack {
                id: Uuid::new_v4(),
                merchant_user_id: payin.merchant_user_id,
                vendor_user_id: payin.vendor_user_id,
                payin_id: payin.id,
                bank_acc_id: payin.bank_acc_id,
                amount: request.amount,
                reference_date: request.reference_date,
                company_id: payin.company_id,
                created_by: actor.user_id,
            })
            .await?;

        let delta = CalculationDelta::chargeback(request.amount);
        debit_parties(tx, &chargeback, &delta).await?;

        info!(
            chargeback_id = %chargeback.id,
            payin_id = %payin.id,
            amount = %chargeback.amount,
            "Chargeback created"
        );

        Ok(chargeback)
    }

    /// Amend a chargeback raised today and move both ledgers by the difference.
    ///
    /// Every amendment counts as another chargeback in `total_chargeback_count`.
    pub async fn update<T: LedgerTx + ?Sized>(
        &self,
        tx: &mut T,
        id: Uuid,
        company_id: Uuid,
        request: &UpdateChargeBackRequest,
    ) -> AppResult<ChargeBack> {
        let existing = tx
            .get_chargeback(id, company_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Chargeback not found: {}", id)))?;

        if !existing.is_editable_on(Utc::now().date_naive()) {
            return Err(AppError::BadRequest("Chargeback data must be from today".to_string()));
        }

        if request.amount <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Chargeback amount must be positive, got {}",
                request.amount
            )));
        }

        let updated = tx
            .update_chargeback_amount(id, request.amount, request.reference_date, request.updated_by)
            .await?;

        let difference = updated.amount - existing.amount;
        let delta = CalculationDelta::chargeback(difference);
        debit_parties(tx, &updated, &delta).await?;

        info!(
            chargeback_id = %id,
            old_amount = %existing.amount,
            new_amount = %updated.amount,
            "Chargeback updated"
        );

        Ok(updated)
    }

    /// Toggle the PayIn's end user on the company block list.
    pub async fn block_user<T: LedgerTx + ?Sized>(
        &self,
        tx: &mut T,
        chargeback_id: Uuid,
        company_id: Uuid,
    ) -> AppResult<Company> {
        let chargeback = tx
            .get_chargeback(chargeback_id, company_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Chargeback not found: {}", chargeback_id)))?;

        let payin = tx
            .find_payin(chargeback.payin_id, company_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("PayIn not found: {}", chargeback.payin_id)))?;

        let company = tx
            .get_company(company_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Company not found: {}", company_id)))?;

        let entry = BlockedUser {
            user_id: payin.end_user_id.clone(),
            user_ip: payin.user_ip.clone(),
        };

        let mut config = company.config.clone();
        let blocked = config.toggle(entry);

        let company = tx.update_company_config(company_id, &config).await?;
        if blocked {
            tx.update_chargeback_config(chargeback_id, &config).await?;
        }

        info!(
            chargeback_id = %chargeback_id,
            company_id = %company_id,
            blocked,
            "Chargeback user block list toggled"
        );

        Ok(company)
    }

    /// Soft-delete. Ledgers are left untouched.
    pub async fn delete<T: LedgerTx + ?Sized>(
        &self,
        tx: &mut T,
        id: Uuid,
        company_id: Uuid,
        actor: &Actor,
    ) -> AppResult<ChargeBack> {
        tx.get_chargeback(id, company_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Chargeback not found: {}", id)))?;

        let chargeback = tx.mark_chargeback_obsolete(id, actor.user_id).await?;
        info!(chargeback_id = %id, "Chargeback deleted");
        Ok(chargeback)
    }
}

async fn debit_parties<T: LedgerTx + ?Sized>(
    tx: &mut T,
    chargeback: &ChargeBack,
    delta: &CalculationDelta,
) -> AppResult<()> {
    tx.apply_calculation_delta(chargeback.merchant_user_id, delta).await?;
    tx.apply_calculation_delta(chargeback.vendor_user_id, delta).await?;
    Ok(())
}
