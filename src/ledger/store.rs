//! Storage contract the engines run against.
//!
//! Every engine operation receives a `LedgerTx` and performs all of its reads
//! and writes through it, so the whole operation commits or rolls back as one
//! unit. Counter columns are only ever changed through relative deltas.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::models::*;
use crate::error::AppResult;
use crate::lock::{LockKey, LockPolicy};

/// Source of transactions
#[async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTx;

    async fn begin(&self) -> AppResult<Self::Tx>;
}

/// A single database transaction. Dropping an unfinished transaction rolls it
/// back and releases every advisory lock it holds.
#[async_trait]
pub trait LedgerTx: Send {
    async fn commit(self) -> AppResult<()>;

    async fn rollback(self) -> AppResult<()>;

    /// Take a transaction-scoped advisory lock. Re-acquiring a key the
    /// transaction already holds succeeds immediately.
    async fn acquire_advisory_lock(&mut self, key: LockKey, policy: LockPolicy) -> AppResult<()>;

    // ========== CALCULATIONS ==========

    /// Insert a zeroed ledger row; returns the existing row if the user has one.
    async fn create_calculation(&mut self, calculation: &Calculation) -> AppResult<Calculation>;

    async fn get_calculation(&mut self, user_id: Uuid) -> AppResult<Option<Calculation>>;

    /// Add `delta` to the user's ledger row. `NotFound` if there is no row.
    async fn apply_calculation_delta(
        &mut self,
        user_id: Uuid,
        delta: &CalculationDelta,
    ) -> AppResult<Calculation>;

    /// Add `delta` to the internal-settlement totals kept in the row's config.
    async fn apply_internal_settlement_delta(
        &mut self,
        user_id: Uuid,
        delta: &InternalSettlementTotals,
    ) -> AppResult<InternalSettlementTotals>;

    // ========== PARTIES ==========

    async fn find_merchant(&mut self, user_id: Uuid) -> AppResult<Option<Merchant>>;

    async fn find_vendor(&mut self, user_id: Uuid) -> AppResult<Option<Vendor>>;

    async fn find_payin(&mut self, payin_id: Uuid, company_id: Uuid) -> AppResult<Option<PayIn>>;

    async fn get_company(&mut self, company_id: Uuid) -> AppResult<Option<Company>>;

    async fn update_company_config(
        &mut self,
        company_id: Uuid,
        config: &BlockListConfig,
    ) -> AppResult<Company>;

    // ========== CHARGEBACKS ==========

    async fn insert_chargeback(&mut self, chargeback: &NewChargeBack) -> AppResult<ChargeBack>;

    /// Live (non-obsolete) chargeback owned by `company_id`
    async fn get_chargeback(&mut self, id: Uuid, company_id: Uuid) -> AppResult<Option<ChargeBack>>;

    async fn update_chargeback_amount(
        &mut self,
        id: Uuid,
        amount: Decimal,
        reference_date: Option<NaiveDate>,
        updated_by: Uuid,
    ) -> AppResult<ChargeBack>;

    async fn update_chargeback_config(
        &mut self,
        id: Uuid,
        config: &BlockListConfig,
    ) -> AppResult<ChargeBack>;

    async fn mark_chargeback_obsolete(&mut self, id: Uuid, updated_by: Uuid) -> AppResult<ChargeBack>;

    // ========== SETTLEMENTS ==========

    async fn insert_settlement(&mut self, settlement: &Settlement) -> AppResult<Settlement>;

    /// Live (non-obsolete) settlement
    async fn get_settlement(&mut self, id: Uuid) -> AppResult<Option<Settlement>>;

    /// Persist amount, status, config, timestamps and `updated_by`.
    async fn save_settlement(&mut self, settlement: &Settlement) -> AppResult<Settlement>;

    async fn mark_settlement_obsolete(&mut self, id: Uuid, updated_by: Uuid) -> AppResult<Settlement>;

    // ========== BANK RESPONSES ==========

    /// Most recent live bank response for `utr`, optionally restricted to a status.
    async fn find_bank_response_by_utr(
        &mut self,
        utr: &str,
        status: Option<&BankResponseStatus>,
    ) -> AppResult<Option<BankResponse>>;

    /// Compare-and-set the status of an unused bank response. Returns false
    /// when the row is no longer in `from` or has been used.
    async fn transition_bank_response(
        &mut self,
        id: Uuid,
        from: &BankResponseStatus,
        to: &BankResponseStatus,
    ) -> AppResult<bool>;

    // ========== BENEFICIARY ACCOUNTS ==========

    async fn get_beneficiary_account(&mut self, id: Uuid) -> AppResult<Option<BeneficiaryAccount>>;

    /// Add `delta` to the account's closing balance and return the new state.
    async fn adjust_beneficiary_closing_balance(
        &mut self,
        id: Uuid,
        delta: Decimal,
    ) -> AppResult<BeneficiaryAccount>;
}
