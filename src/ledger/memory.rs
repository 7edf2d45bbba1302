//! In-memory ledger store.
//!
//! Mirrors the Postgres store closely enough to run every engine against it:
//! writes land immediately and each transaction keeps an undo journal that is
//! replayed in reverse on rollback (or drop). Counter updates are journaled as
//! inverse deltas so a rollback never clobbers another transaction's work.
//! Advisory locks are per-key async mutexes held until the transaction ends.
//!
//! Writes are visible to other transactions before commit, so this store
//! gives read-uncommitted isolation. Good enough for tests and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::models::*;
use super::store::{LedgerStore, LedgerTx};
use crate::error::{AppError, AppResult};
use crate::lock::{LockKey, LockPolicy};

#[derive(Debug, Default)]
struct MemoryState {
    /// Keyed by `user_id`
    calculations: HashMap<Uuid, Calculation>,
    /// Keyed by `user_id`
    merchants: HashMap<Uuid, Merchant>,
    /// Keyed by `user_id`
    vendors: HashMap<Uuid, Vendor>,
    payins: HashMap<Uuid, PayIn>,
    companies: HashMap<Uuid, Company>,
    chargebacks: HashMap<Uuid, ChargeBack>,
    settlements: HashMap<Uuid, Settlement>,
    bank_responses: HashMap<Uuid, BankResponse>,
    beneficiaries: HashMap<Uuid, BeneficiaryAccount>,
    failing_calculations: HashSet<Uuid>,
}

/// One reversible write
#[derive(Debug)]
enum Undo {
    CalculationDelta { user_id: Uuid, delta: CalculationDelta },
    InternalTotals { user_id: Uuid, delta: InternalSettlementTotals },
    BeneficiaryBalance { id: Uuid, delta: Decimal },
    Calculation { user_id: Uuid, previous: Option<Calculation> },
    Company { id: Uuid, previous: Option<Company> },
    ChargeBack { id: Uuid, previous: Option<ChargeBack> },
    Settlement { id: Uuid, previous: Option<Settlement> },
    BankResponse { id: Uuid, previous: Option<BankResponse> },
}

impl MemoryState {
    fn undo(&mut self, entry: Undo) {
        match entry {
            Undo::CalculationDelta { user_id, delta } => {
                if let Some(calc) = self.calculations.get_mut(&user_id) {
                    calc.apply(&delta.negate());
                }
            }
            Undo::InternalTotals { user_id, delta } => {
                if let Some(calc) = self.calculations.get_mut(&user_id) {
                    calc.config.internal_settlement =
                        calc.config.internal_settlement.accumulate(&delta.negate());
                }
            }
            Undo::BeneficiaryBalance { id, delta } => {
                if let Some(account) = self.beneficiaries.get_mut(&id) {
                    account.config.closing_balance -= delta;
                }
            }
            Undo::Calculation { user_id, previous } => restore(&mut self.calculations, user_id, previous),
            Undo::Company { id, previous } => restore(&mut self.companies, id, previous),
            Undo::ChargeBack { id, previous } => restore(&mut self.chargebacks, id, previous),
            Undo::Settlement { id, previous } => restore(&mut self.settlements, id, previous),
            Undo::BankResponse { id, previous } => restore(&mut self.bank_responses, id, previous),
        }
    }
}

fn restore<T>(map: &mut HashMap<Uuid, T>, id: Uuid, previous: Option<T>) {
    match previous {
        Some(row) => {
            map.insert(id, row);
        }
        None => {
            map.remove(&id);
        }
    }
}

type LockTable = HashMap<i64, Arc<AsyncMutex<()>>>;

/// Thread-safe in-memory store, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
    locks: Arc<Mutex<LockTable>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== SEEDING ==========

    pub fn insert_company(&self, company: Company) {
        self.state.lock().companies.insert(company.id, company);
    }

    pub fn insert_merchant(&self, merchant: Merchant) {
        self.state.lock().merchants.insert(merchant.user_id, merchant);
    }

    pub fn insert_vendor(&self, vendor: Vendor) {
        self.state.lock().vendors.insert(vendor.user_id, vendor);
    }

    pub fn insert_calculation(&self, calculation: Calculation) {
        self.state
            .lock()
            .calculations
            .insert(calculation.user_id, calculation);
    }

    pub fn insert_payin(&self, payin: PayIn) {
        self.state.lock().payins.insert(payin.id, payin);
    }

    pub fn insert_chargeback(&self, chargeback: ChargeBack) {
        self.state.lock().chargebacks.insert(chargeback.id, chargeback);
    }

    pub fn insert_settlement(&self, settlement: Settlement) {
        self.state.lock().settlements.insert(settlement.id, settlement);
    }

    pub fn insert_bank_response(&self, response: BankResponse) {
        self.state.lock().bank_responses.insert(response.id, response);
    }

    pub fn insert_beneficiary_account(&self, account: BeneficiaryAccount) {
        self.state.lock().beneficiaries.insert(account.id, account);
    }

    // ========== INSPECTION ==========

    pub fn calculation(&self, user_id: Uuid) -> Option<Calculation> {
        self.state.lock().calculations.get(&user_id).cloned()
    }

    pub fn company(&self, id: Uuid) -> Option<Company> {
        self.state.lock().companies.get(&id).cloned()
    }

    pub fn chargeback(&self, id: Uuid) -> Option<ChargeBack> {
        self.state.lock().chargebacks.get(&id).cloned()
    }

    pub fn chargeback_count(&self) -> usize {
        self.state.lock().chargebacks.len()
    }

    pub fn settlement(&self, id: Uuid) -> Option<Settlement> {
        self.state.lock().settlements.get(&id).cloned()
    }

    pub fn settlement_count(&self) -> usize {
        self.state.lock().settlements.len()
    }

    pub fn bank_response(&self, id: Uuid) -> Option<BankResponse> {
        self.state.lock().bank_responses.get(&id).cloned()
    }

    pub fn beneficiary_account(&self, id: Uuid) -> Option<BeneficiaryAccount> {
        self.state.lock().beneficiaries.get(&id).cloned()
    }

    // ========== FAULT INJECTION ==========

    /// Make every ledger delta for `user_id` fail with an internal error.
    pub fn fail_calculation_updates_for(&self, user_id: Uuid) {
        self.state.lock().failing_calculations.insert(user_id);
    }

    pub fn clear_failures(&self) {
        self.state.lock().failing_calculations.clear();
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> AppResult<MemoryTx> {
        Ok(MemoryTx {
            state: Arc::clone(&self.state),
            locks: Arc::clone(&self.locks),
            held_locks: HashMap::new(),
            journal: Vec::new(),
        })
    }
}

pub struct MemoryTx {
    state: Arc<Mutex<MemoryState>>,
    locks: Arc<Mutex<LockTable>>,
    held_locks: HashMap<i64, OwnedMutexGuard<()>>,
    journal: Vec<Undo>,
}

impl MemoryTx {
    fn undo_all(&mut self) {
        if self.journal.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        while let Some(entry) = self.journal.pop() {
            state.undo(entry);
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        self.undo_all();
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn commit(mut self) -> AppResult<()> {
        self.journal.clear();
        Ok(())
    }

    async fn rollback(mut self) -> AppResult<()> {
        self.undo_all();
        Ok(())
    }

    async fn acquire_advisory_lock(&mut self, key: LockKey, policy: LockPolicy) -> AppResult<()> {
        if self.held_locks.contains_key(&key.value()) {
            return Ok(());
        }

        let mutex = Arc::clone(self.locks.lock().entry(key.value()).or_default());

        let guard = match policy {
            LockPolicy::FailFast => mutex.try_lock_owned().map_err(|_| {
                AppError::ConcurrencyConflict(format!(
                    "Edit lock {} is held by another transaction",
                    key
                ))
            })?,
            LockPolicy::Wait { timeout } => tokio::time::timeout(timeout, mutex.lock_owned())
                .await
                .map_err(|_| {
                    AppError::ConcurrencyConflict(format!(
                        "Timed out waiting for edit lock {}",
                        key
                    ))
                })?,
        };

        self.held_locks.insert(key.value(), guard);
        Ok(())
    }

    // ========== CALCULATIONS ==========

    async fn create_calculation(&mut self, calculation: &Calculation) -> AppResult<Calculation> {
        let mut state = self.state.lock();
        if let Some(existing) = state.calculations.get(&calculation.user_id) {
            return Ok(existing.clone());
        }
        state
            .calculations
            .insert(calculation.user_id, calculation.clone());
        self.journal.push(Undo::Calculation {
            user_id: calculation.user_id,
            previous: None,
        });
        Ok(calculation.clone())
    }

    async fn get_calculation(&mut self, user_id: Uuid) -> AppResult<Option<Calculation>> {
        Ok(self.state.lock().calculations.get(&user_id).cloned())
    }

    async fn apply_calculation_delta(
        &mut self,
        user_id: Uuid,
        delta: &CalculationDelta,
    ) -> AppResult<Calculation> {
        let mut state = self.state.lock();
        if state.failing_calculations.contains(&user_id) {
            return Err(AppError::Internal(format!(
                "Injected failure updating calculation for user {}",
                user_id
            )));
        }
        let calc = state
            .calculations
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("Calculation not found for user {}", user_id)))?;
        calc.apply(delta);
        let updated = calc.clone();
        self.journal.push(Undo::CalculationDelta { user_id, delta: *delta });
        Ok(updated)
    }

    async fn apply_internal_settlement_delta(
        &mut self,
        user_id: Uuid,
        delta: &InternalSettlementTotals,
    ) -> AppResult<InternalSettlementTotals> {
        let mut state = self.state.lock();
        let calc = state
            .calculations
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound(format!("Calculation not found for user {}", user_id)))?;
        calc.config.internal_settlement = calc.config.internal_settlement.accumulate(delta);
        calc.updated_at = Utc::now();
        let totals = calc.config.internal_settlement;
        self.journal.push(Undo::InternalTotals { user_id, delta: *delta });
        Ok(totals)
    }

    // ========== PARTIES ==========

    async fn find_merchant(&mut self, user_id: Uuid) -> AppResult<Option<Merchant>> {
        Ok(self.state.lock().merchants.get(&user_id).cloned())
    }

    async fn find_vendor(&mut self, user_id: Uuid) -> AppResult<Option<Vendor>> {
        Ok(self.state.lock().vendors.get(&user_id).cloned())
    }

    async fn find_payin(&mut self, payin_id: Uuid, company_id: Uuid) -> AppResult<Option<PayIn>> {
        Ok(self
            .state
            .lock()
            .payins
            .get(&payin_id)
            .filter(|p| p.company_id == company_id)
            .cloned())
    }

    async fn get_company(&mut self, company_id: Uuid) -> AppResult<Option<Company>> {
        Ok(self.state.lock().companies.get(&company_id).cloned())
    }

    async fn update_company_config(
        &mut self,
        company_id: Uuid,
        config: &BlockListConfig,
    ) -> AppResult<Company> {
        let mut state = self.state.lock();
        let company = state
            .companies
            .get_mut(&company_id)
            .ok_or_else(|| AppError::NotFound(format!("Company not found: {}", company_id)))?;
        let previous = company.clone();
        company.config = config.clone();
        company.updated_at = Utc::now();
        let updated = company.clone();
        self.journal.push(Undo::Company {
            id: company_id,
            previous: Some(previous),
        });
        Ok(updated)
    }

    // ========== CHARGEBACKS ==========

    async fn insert_chargeback(&mut self, new: &NewChargeBack) -> AppResult<ChargeBack> {
        let now = Utc::now();
        let chargeback = ChargeBack {
            id: new.id,
            merchant_user_id: new.merchant_user_id,
            vendor_user_id: new.vendor_user_id,
            payin_id: new.payin_id,
            bank_acc_id: new.bank_acc_id,
            amount: new.amount,
            reference_date: new.reference_date,
            company_id: new.company_id,
            config: BlockListConfig::default(),
            is_obsolete: false,
            created_by: new.created_by,
            updated_by: new.created_by,
            created_at: now,
            updated_at: now,
        };
        let previous = self
            .state
            .lock()
            .chargebacks
            .insert(chargeback.id, chargeback.clone());
        self.journal.push(Undo::ChargeBack { id: chargeback.id, previous });
        Ok(chargeback)
    }

    async fn get_chargeback(&mut self, id: Uuid, company_id: Uuid) -> AppResult<Option<ChargeBack>> {
        Ok(self
            .state
            .lock()
            .chargebacks
            .get(&id)
            .filter(|c| c.company_id == company_id && !c.is_obsolete)
            .cloned())
    }

    async fn update_chargeback_amount(
        &mut self,
        id: Uuid,
        amount: Decimal,
        reference_date: Option<NaiveDate>,
        updated_by: Uuid,
    ) -> AppResult<ChargeBack> {
        self.modify_chargeback(id, |c| {
            c.amount = amount;
            if reference_date.is_some() {
                c.reference_date = reference_date;
            }
            c.updated_by = updated_by;
        })
    }

    async fn update_chargeback_config(
        &mut self,
        id: Uuid,
        config: &BlockListConfig,
    ) -> AppResult<ChargeBack> {
        self.modify_chargeback(id, |c| c.config = config.clone())
    }

    async fn mark_chargeback_obsolete(&mut self, id: Uuid, updated_by: Uuid) -> AppResult<ChargeBack> {
        self.modify_chargeback(id, |c| {
            c.is_obsolete = true;
            c.updated_by = updated_by;
        })
    }

    // ========== SETTLEMENTS ==========

    async fn insert_settlement(&mut self, settlement: &Settlement) -> AppResult<Settlement> {
        let previous = self
            .state
            .lock()
            .settlements
            .insert(settlement.id, settlement.clone());
        self.journal.push(Undo::Settlement { id: settlement.id, previous });
        Ok(settlement.clone())
    }

    async fn get_settlement(&mut self, id: Uuid) -> AppResult<Option<Settlement>> {
        Ok(self
            .state
            .lock()
            .settlements
            .get(&id)
            .filter(|s| !s.is_obsolete)
            .cloned())
    }

    async fn save_settlement(&mut self, settlement: &Settlement) -> AppResult<Settlement> {
        let source = settlement.clone();
        self.modify_settlement(settlement.id, move |s| {
            s.amount = source.amount;
            s.status = source.status;
            s.config = source.config;
            s.approved_at = source.approved_at;
            s.rejected_at = source.rejected_at;
            s.updated_by = source.updated_by;
        })
    }

    async fn mark_settlement_obsolete(&mut self, id: Uuid, updated_by: Uuid) -> AppResult<Settlement> {
        self.modify_settlement(id, |s| {
            s.is_obsolete = true;
            s.updated_by = updated_by;
        })
    }

    // ========== BANK RESPONSES ==========

    async fn find_bank_response_by_utr(
        &mut self,
        utr: &str,
        status: Option<&BankResponseStatus>,
    ) -> AppResult<Option<BankResponse>> {
        Ok(self
            .state
            .lock()
            .bank_responses
            .values()
            .filter(|r| r.utr == utr)
            .filter(|r| status.map_or(true, |s| &r.status == s))
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn transition_bank_response(
        &mut self,
        id: Uuid,
        from: &BankResponseStatus,
        to: &BankResponseStatus,
    ) -> AppResult<bool> {
        let mut state = self.state.lock();
        let Some(response) = state.bank_responses.get_mut(&id) else {
            return Ok(false);
        };
        if response.is_used || &response.status != from {
            return Ok(false);
        }
        let previous = response.clone();
        response.status = to.clone();
        response.updated_at = Utc::now();
        self.journal.push(Undo::BankResponse {
            id,
            previous: Some(previous),
        });
        Ok(true)
    }

    // ========== BENEFICIARY ACCOUNTS ==========

    async fn get_beneficiary_account(&mut self, id: Uuid) -> AppResult<Option<BeneficiaryAccount>> {
        Ok(self.state.lock().beneficiaries.get(&id).cloned())
    }

    async fn adjust_beneficiary_closing_balance(
        &mut self,
        id: Uuid,
        delta: Decimal,
    ) -> AppResult<BeneficiaryAccount> {
        let mut state = self.state.lock();
        let account = state
            .beneficiaries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Beneficiary account not found: {}", id)))?;
        account.config.closing_balance += delta;
        account.updated_at = Utc::now();
        let updated = account.clone();
        self.journal.push(Undo::BeneficiaryBalance { id, delta });
        Ok(updated)
    }
}

impl MemoryTx {
    fn modify_chargeback(
        &mut self,
        id: Uuid,
        change: impl FnOnce(&mut ChargeBack),
    ) -> AppResult<ChargeBack> {
        let mut state = self.state.lock();
        let chargeback = state
            .chargebacks
            .get_mut(&id)
            .filter(|c| !c.is_obsolete)
            .ok_or_else(|| AppError::NotFound(format!("Chargeback not found: {}", id)))?;
        let previous = chargeback.clone();
        change(chargeback);
        chargeback.updated_at = Utc::now();
        let updated = chargeback.clone();
        self.journal.push(Undo::ChargeBack {
            id,
            previous: Some(previous),
        });
        Ok(updated)
    }

    fn modify_settlement(
        &mut self,
        id: Uuid,
        change: impl FnOnce(&mut Settlement),
    ) -> AppResult<Settlement> {
        let mut state = self.state.lock();
        let settlement = state
            .settlements
            .get_mut(&id)
            .filter(|s| !s.is_obsolete)
            .ok_or_else(|| AppError::NotFound(format!("Settlement not found: {}", id)))?;
        let previous = settlement.clone();
        change(settlement);
        settlement.updated_at = Utc::now();
        let updated = settlement.clone();
        self.journal.push(Undo::Settlement {
            id,
            previous: Some(previous),
        });
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockScope;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn seeded() -> (MemoryLedgerStore, Uuid) {
        let store = MemoryLedgerStore::new();
        let user_id = Uuid::new_v4();
        store.insert_calculation(Calculation::new(user_id, Uuid::new_v4()));
        (store, user_id)
    }

    #[tokio::test]
    async fn test_commit_keeps_writes() {
        let (store, user_id) = seeded();
        let mut tx = store.begin().await.unwrap();
        tx.apply_calculation_delta(user_id, &CalculationDelta::chargeback(dec!(50)))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.calculation(user_id).unwrap().current_balance, dec!(-50));
    }

    #[tokio::test]
    async fn test_rollback_undoes_writes() {
        let (store, user_id) = seeded();
        let mut tx = store.begin().await.unwrap();
        tx.apply_calculation_delta(user_id, &CalculationDelta::chargeback(dec!(50)))
            .await
            .unwrap();
        tx.apply_internal_settlement_delta(
            user_id,
            &InternalSettlementTotals::settled(dec!(10), dec!(1)),
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        let calc = store.calculation(user_id).unwrap();
        assert_eq!(calc.current_balance, Decimal::ZERO);
        assert_eq!(calc.total_chargeback_count, 0);
        assert_eq!(calc.config.internal_settlement, InternalSettlementTotals::default());
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let (store, user_id) = seeded();
        {
            let mut tx = store.begin().await.unwrap();
            tx.apply_calculation_delta(user_id, &CalculationDelta::chargeback(dec!(75)))
                .await
                .unwrap();
        }
        assert_eq!(store.calculation(user_id).unwrap().net_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_rollback_preserves_other_transactions_deltas() {
        let (store, user_id) = seeded();
        let mut tx1 = store.begin().await.unwrap();
        let mut tx2 = store.begin().await.unwrap();
        tx1.apply_calculation_delta(user_id, &CalculationDelta::chargeback(dec!(10)))
            .await
            .unwrap();
        tx2.apply_calculation_delta(user_id, &CalculationDelta::chargeback(dec!(5)))
            .await
            .unwrap();
        tx2.commit().await.unwrap();
        tx1.rollback().await.unwrap();

        assert_eq!(store.calculation(user_id).unwrap().current_balance, dec!(-5));
    }

    #[tokio::test]
    async fn test_missing_calculation_is_not_found() {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .apply_calculation_delta(Uuid::new_v4(), &CalculationDelta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let (store, user_id) = seeded();
        store.fail_calculation_updates_for(user_id);
        let mut tx = store.begin().await.unwrap();
        let err = tx
            .apply_calculation_delta(user_id, &CalculationDelta::chargeback(dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[tokio::test]
    async fn test_bank_response_compare_and_set() {
        let store = MemoryLedgerStore::new();
        let response = BankResponse {
            id: Uuid::new_v4(),
            bank_id: Uuid::new_v4(),
            utr: "UTR-CAS".into(),
            amount: dec!(100),
            status: BankResponseStatus::Success,
            is_used: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.insert_bank_response(response.clone());

        let mut tx = store.begin().await.unwrap();
        assert!(tx
            .transition_bank_response(
                response.id,
                &BankResponseStatus::Success,
                &BankResponseStatus::InternalTransfer
            )
            .await
            .unwrap());
        assert!(!tx
            .transition_bank_response(
                response.id,
                &BankResponseStatus::Success,
                &BankResponseStatus::InternalTransfer
            )
            .await
            .unwrap());
        tx.commit().await.unwrap();

        assert_eq!(
            store.bank_response(response.id).unwrap().status,
            BankResponseStatus::InternalTransfer
        );
    }

    #[tokio::test]
    async fn test_create_calculation_is_idempotent() {
        let store = MemoryLedgerStore::new();
        let user_id = Uuid::new_v4();
        let company_id = Uuid::new_v4();
        let mut tx = store.begin().await.unwrap();
        let first = tx
            .create_calculation(&Calculation::new(user_id, company_id))
            .await
            .unwrap();
        let second = tx
            .create_calculation(&Calculation::new(user_id, company_id))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_fail_fast_lock_conflicts_while_held() {
        let store = MemoryLedgerStore::new();
        let key = LockKey::for_record(LockScope::Settlement, Uuid::new_v4());

        let mut tx1 = store.begin().await.unwrap();
        tx1.acquire_advisory_lock(key, LockPolicy::FailFast).await.unwrap();
        // re-entrant within the same transaction
        tx1.acquire_advisory_lock(key, LockPolicy::FailFast).await.unwrap();

        let mut tx2 = store.begin().await.unwrap();
        let err = tx2
            .acquire_advisory_lock(key, LockPolicy::FailFast)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        tx1.commit().await.unwrap();
        tx2.acquire_advisory_lock(key, LockPolicy::FailFast).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_lock_times_out() {
        let store = MemoryLedgerStore::new();
        let key = LockKey::for_record(LockScope::Payout, Uuid::new_v4());

        let mut tx1 = store.begin().await.unwrap();
        tx1.acquire_advisory_lock(key, LockPolicy::FailFast).await.unwrap();

        let mut tx2 = store.begin().await.unwrap();
        let err = tx2
            .acquire_advisory_lock(key, LockPolicy::Wait { timeout: Duration::from_millis(20) })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConcurrencyConflict(_)));
    }

    #[tokio::test]
    async fn test_dropped_transaction_releases_lock() {
        let store = MemoryLedgerStore::new();
        let key = LockKey::for_record(LockScope::Settlement, Uuid::new_v4());
        {
            let mut tx = store.begin().await.unwrap();
            tx.acquire_advisory_lock(key, LockPolicy::FailFast).await.unwrap();
        }
        let mut tx = store.begin().await.unwrap();
        tx.acquire_advisory_lock(key, LockPolicy::FailFast).await.unwrap();
    }
}
