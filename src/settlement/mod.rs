// Settlement Engine: creation and state transitions with their ledger effects
pub mod transition;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::bank_response;
use crate::commission::{calculate_commission, DEFAULT_COMMISSION_SCALE};
use crate::error::{AppError, AppResult};
use crate::ledger::models::*;
use crate::ledger::store::LedgerTx;
use crate::lock::{acquire_edit_lock, LockPolicy, LockScope};

pub use transition::Transition;

#[derive(Debug, Clone, Copy)]
pub struct SettlementEngine {
    lock_policy: LockPolicy,
    commission_scale: u32,
}

impl Default for SettlementEngine {
    fn default() -> Self {
        Self::new(LockPolicy::default(), DEFAULT_COMMISSION_SCALE)
    }
}

impl SettlementEngine {
    pub fn new(lock_policy: LockPolicy, commission_scale: u32) -> Self {
        Self { lock_policy, commission_scale }
    }

    pub fn lock_policy(&self) -> LockPolicy {
        self.lock_policy
    }

    /// Record a settlement. Internal transfers are realized immediately by
    /// claiming their bank credit; every other method waits for approval.
    pub async fn create<T: LedgerTx + ?Sized>(
        &self,
        tx: &mut T,
        request: &CreateSettlementRequest,
    ) -> AppResult<Settlement> {
        let now = Utc::now();
        let mut settlement = Settlement {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            company_id: request.company_id,
            amount: request.amount,
            method: request.method.clone(),
            status: SettlementStatus::Initiated,
            config: request.config.clone(),
            approved_at: None,
            rejected_at: None,
            is_obsolete: false,
            created_by: request.created_by,
            updated_by: request.created_by,
            created_at: now,
            updated_at: now,
        };

        if request.method.is_internal_transfer() {
            self.realize_internal_transfer(tx, &settlement).await?;
            settlement.status = SettlementStatus::Success;
            settlement.approved_at = Some(now);
        } else {
            settlement.amount = signed_amount(request.amount, request.config.debit_credit);
        }

        let settlement = tx.insert_settlement(&settlement).await?;

        info!(
            settlement_id = %settlement.id,
            user_id = %settlement.user_id,
            method = %settlement.method,
            status = %settlement.status,
            amount = %settlement.amount,
            "Settlement created"
        );

        Ok(settlement)
    }

    async fn realize_internal_transfer<T: LedgerTx + ?Sized>(
        &self,
        tx: &mut T,
        settlement: &Settlement,
    ) -> AppResult<()> {
        let amount = settlement.amount;
        if amount <= Decimal::ZERO {
            return Err(AppError::Validation(format!(
                "Internal transfer amount must be positive, got {}",
                amount
            )));
        }

        let utr = settlement
            .config
            .reference_id
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                AppError::Validation("reference_id is required for internal transfers".to_string())
            })?;

        bank_response::claim_for_internal_transfer(tx, &utr).await?;

        let vendor = self.require_vendor_ledger(tx, settlement.user_id).await?;
        let commission = calculate_commission(amount, vendor.payin_commission, self.commission_scale);

        tx.apply_calculation_delta(
            settlement.user_id,
            &CalculationDelta::settlement(-amount, commission, commission - amount),
        )
        .await?;
        tx.apply_internal_settlement_delta(
            settlement.user_id,
            &InternalSettlementTotals::settled(amount, commission),
        )
        .await?;

        debug!(
            settlement_id = %settlement.id,
            utr = %utr,
            commission = %commission,
            "Internal transfer realized"
        );

        Ok(())
    }

    /// Drive a settlement through its state machine under the record's edit lock.
    pub async fn update<T: LedgerTx + ?Sized>(
        &self,
        tx: &mut T,
        id: Uuid,
        request: &UpdateSettlementRequest,
    ) -> AppResult<Settlement> {
        let _lock = acquire_edit_lock(tx, LockScope::Settlement, id, self.lock_policy).await?;

        let mut settlement = tx
            .get_settlement(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Settlement not found: {}", id)))?;

        let transition = transition::plan(&settlement, request)?;
        let previous_status = settlement.status;
        let stored_reference = settlement.config.reference_id.clone();
        let amount = request.amount.unwrap_or(settlement.amount);

        settlement.config.merge(&request.config);
        if request.amount.is_some() {
            settlement.amount = amount;
        }
        settlement.updated_by = request.updated_by;

        let now = Utc::now();
        match transition {
            Transition::Approve => {
                self.approve(tx, &mut settlement, amount).await?;
                settlement.approved_at = Some(now);
            }
            Transition::Reject => {
                settlement.rejected_at = Some(now);
            }
            Transition::Reverse => {
                self.reverse(tx, &mut settlement, stored_reference.as_deref(), amount)
                    .await?;
                settlement.rejected_at = Some(now);
            }
            Transition::Mark(_) | Transition::Amend => {}
        }
        if let Some(status) = transition.target_status() {
            settlement.status = status;
        }

        let saved = tx.save_settlement(&settlement).await?;

        info!(
            settlement_id = %id,
            from = %previous_status,
            to = %saved.status,
            amount = %amount,
            "Settlement updated"
        );

        Ok(saved)
    }

    async fn approve<T: LedgerTx + ?Sized>(
        &self,
        tx: &mut T,
        settlement: &mut Settlement,
        amount: Decimal,
    ) -> AppResult<()> {
        match party_kind(tx, settlement.user_id).await? {
            PartyKind::Merchant => {
                tx.apply_calculation_delta(
                    settlement.user_id,
                    &CalculationDelta::settlement(amount, Decimal::ZERO, -amount),
                )
                .await?;
            }
            PartyKind::Vendor => {
                tx.apply_calculation_delta(
                    settlement.user_id,
                    &CalculationDelta::settlement(amount, Decimal::ZERO, amount),
                )
                .await?;
                if settlement.method == SettlementMethod::Bank {
                    move_beneficiary_balance(tx, &mut settlement.config, amount, true).await?;
                }
            }
        }
        Ok(())
    }

    async fn reverse<T: LedgerTx + ?Sized>(
        &self,
        tx: &mut T,
        settlement: &mut Settlement,
        stored_reference: Option<&str>,
        amount: Decimal,
    ) -> AppResult<()> {
        let delta = match party_kind(tx, settlement.user_id).await? {
            PartyKind::Merchant => CalculationDelta::settlement(-amount, Decimal::ZERO, amount),
            PartyKind::Vendor if settlement.method.is_internal_transfer() => {
                let vendor = self.require_vendor_ledger(tx, settlement.user_id).await?;
                let utr = stored_reference.filter(|r| !r.is_empty()).ok_or_else(|| {
                    AppError::BadRequest(format!(
                        "Settlement {} has no reference to reverse",
                        settlement.id
                    ))
                })?;
                bank_response::release_internal_transfer(tx, utr).await?;

                let commission =
                    calculate_commission(amount, vendor.payin_commission, self.commission_scale);
                tx.apply_internal_settlement_delta(
                    settlement.user_id,
                    &InternalSettlementTotals::settled(amount, commission).negate(),
                )
                .await?;

                CalculationDelta::settlement(amount, -commission, amount - commission)
            }
            PartyKind::Vendor => {
                if settlement.method == SettlementMethod::Bank {
                    move_beneficiary_balance(tx, &mut settlement.config, amount, false).await?;
                }
                CalculationDelta::settlement(-amount, Decimal::ZERO, -amount)
            }
        };

        tx.apply_calculation_delta(settlement.user_id, &delta).await?;
        Ok(())
    }

    async fn require_vendor_ledger<T: LedgerTx + ?Sized>(
        &self,
        tx: &mut T,
        user_id: Uuid,
    ) -> AppResult<Vendor> {
        let vendor = tx
            .find_vendor(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Vendor not found for user {}", user_id)))?;
        tx.get_calculation(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Calculation not found for user {}", user_id)))?;
        Ok(vendor)
    }

    /// Soft-delete under the edit lock. No ledger reversal.
    pub async fn delete<T: LedgerTx + ?Sized>(
        &self,
        tx: &mut T,
        id: Uuid,
        actor: &Actor,
    ) -> AppResult<Settlement> {
        let _lock = acquire_edit_lock(tx, LockScope::Settlement, id, self.lock_policy).await?;
        let settlement = tx.mark_settlement_obsolete(id, actor.user_id).await?;
        info!(settlement_id = %id, "Settlement deleted");
        Ok(settlement)
    }
}

/// Amount stored for a non-internal settlement. `RECEIVED` flips a positive
/// amount negative and keeps a negative one as is; everything else is stored
/// as its absolute value.
pub fn signed_amount(amount: Decimal, debit_credit: Option<DebitCredit>) -> Decimal {
    match debit_credit {
        Some(DebitCredit::Received) if amount > Decimal::ZERO => -amount,
        Some(DebitCredit::Received) => amount,
        _ => amount.abs(),
    }
}

/// Merchants withdraw from what they are owed, vendors get credited.
async fn party_kind<T: LedgerTx + ?Sized>(tx: &mut T, user_id: Uuid) -> AppResult<PartyKind> {
    if tx.find_merchant(user_id).await?.is_some() {
        return Ok(PartyKind::Merchant);
    }
    if tx.find_vendor(user_id).await?.is_some() {
        return Ok(PartyKind::Vendor);
    }
    Err(AppError::NotFound(format!(
        "No merchant or vendor registered for user {}",
        user_id
    )))
}

/// Move the beneficiary account's closing balance for a vendor BANK
/// settlement and snapshot it onto the settlement config. Money sent out
/// lowers the balance on approval; a reversal moves it the other way.
async fn move_beneficiary_balance<T: LedgerTx + ?Sized>(
    tx: &mut T,
    config: &mut SettlementConfig,
    amount: Decimal,
    approving: bool,
) -> AppResult<()> {
    let bank_id = config.bank_id.ok_or_else(|| {
        AppError::Validation("bank_id is required for BANK settlements".to_string())
    })?;

    let account = tx
        .get_beneficiary_account(bank_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Beneficiary account not found: {}", bank_id)))?;

    let sending = config.debit_credit == Some(DebitCredit::Send);
    let delta = if sending == approving { -amount } else { amount };
    let updated = tx.adjust_beneficiary_closing_balance(bank_id, delta).await?;

    config.beneficiary_initial_balance = Some(account.config.closing_balance);
    config.beneficiary_closing_balance = Some(updated.config.closing_balance);

    debug!(
        beneficiary_id = %bank_id,
        initial = %account.config.closing_balance,
        closing = %updated.config.closing_balance,
        "Beneficiary balance moved"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::MemoryLedgerStore;
    use crate::ledger::store::LedgerStore;
    use rust_decimal_macros::dec;

    struct Parties {
        store: MemoryLedgerStore,
        company_id: Uuid,
        merchant: Uuid,
        vendor: Uuid,
        beneficiary: Uuid,
    }

    fn parties() -> Parties {
        let store = MemoryLedgerStore::new();
        let company_id = Uuid::new_v4();
        let merchant = Uuid::new_v4();
        let vendor = Uuid::new_v4();
        let beneficiary = Uuid::new_v4();

        store.insert_merchant(Merchant {
            id: Uuid::new_v4(),
            user_id: merchant,
            company_id,
            code: "M1".into(),
        });
        store.insert_vendor(Vendor {
            id: Uuid::new_v4(),
            user_id: vendor,
            company_id,
            code: "V1".into(),
            payin_commission: dec!(2),
        });
        store.insert_calculation(Calculation::new(merchant, company_id));
        store.insert_calculation(Calculation::new(vendor, company_id));
        store.insert_beneficiary_account(BeneficiaryAccount {
            id: beneficiary,
            company_id,
            user_id: vendor,
            config: BeneficiaryConfig {
                initial_balance: dec!(10000),
                closing_balance: dec!(10000),
                ..BeneficiaryConfig::default()
            },
            updated_at: Utc::now(),
        });

        Parties { store, company_id, merchant, vendor, beneficiary }
    }

    fn credit(utr: &str) -> BankResponse {
        BankResponse {
            id: Uuid::new_v4(),
            bank_id: Uuid::new_v4(),
            utr: utr.to_string(),
            amount: dec!(1000),
            status: BankResponseStatus::Success,
            is_used: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn create_request(
        p: &Parties,
        user_id: Uuid,
        amount: Decimal,
        method: SettlementMethod,
        config: SettlementConfig,
    ) -> CreateSettlementRequest {
        CreateSettlementRequest {
            user_id,
            company_id: p.company_id,
            amount,
            method,
            config,
            created_by: Uuid::nil(),
        }
    }

    fn approve_request(utr: &str) -> UpdateSettlementRequest {
        UpdateSettlementRequest {
            amount: None,
            status: None,
            config: SettlementConfig {
                reference_id: Some(utr.to_string()),
                ..SettlementConfig::default()
            },
            updated_by: Uuid::nil(),
        }
    }

    fn reverse_request() -> UpdateSettlementRequest {
        UpdateSettlementRequest {
            amount: None,
            status: Some(SettlementStatus::Initiated),
            config: SettlementConfig::default(),
            updated_by: Uuid::nil(),
        }
    }

    #[test]
    fn test_signed_amount() {
        assert_eq!(signed_amount(dec!(100), Some(DebitCredit::Received)), dec!(-100));
        assert_eq!(signed_amount(dec!(-100), Some(DebitCredit::Received)), dec!(-100));
        assert_eq!(signed_amount(dec!(-100), Some(DebitCredit::Send)), dec!(100));
        assert_eq!(signed_amount(dec!(-100), None), dec!(100));
    }

    #[tokio::test]
    async fn test_internal_qr_transfer_realizes_commission() {
        let p = parties();
        let response = credit("UTR-QR-1");
        p.store.insert_bank_response(response.clone());
        let engine = SettlementEngine::default();

        let mut tx = p.store.begin().await.unwrap();
        let settlement = engine
            .create(
                &mut tx,
                &create_request(
                    &p,
                    p.vendor,
                    dec!(1000),
                    SettlementMethod::InternalQrTransfer,
                    SettlementConfig {
                        reference_id: Some("UTR-QR-1".into()),
                        ..SettlementConfig::default()
                    },
                ),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(settlement.status, SettlementStatus::Success);
        let calc = p.store.calculation(p.vendor).unwrap();
        assert_eq!(calc.total_settlement_count, 1);
        assert_eq!(calc.total_settlement_amount, dec!(-1000));
        assert_eq!(calc.total_settlement_commission, dec!(20));
        assert_eq!(calc.current_balance, dec!(-980));
        assert_eq!(calc.net_balance, dec!(-980));
        assert_eq!(
            calc.config.internal_settlement,
            InternalSettlementTotals { amount: dec!(1000), count: 1, commission: dec!(20) }
        );
        assert_eq!(
            p.store.bank_response(response.id).unwrap().status,
            BankResponseStatus::InternalTransfer
        );
    }

    #[tokio::test]
    async fn test_internal_transfer_reversal_restores_everything() {
        let p = parties();
        let response = credit("UTR-QR-2");
        p.store.insert_bank_response(response.clone());
        let engine = SettlementEngine::default();

        let mut tx = p.store.begin().await.unwrap();
        let settlement = engine
            .create(
                &mut tx,
                &create_request(
                    &p,
                    p.vendor,
                    dec!(1000),
                    SettlementMethod::InternalBankTransfer,
                    SettlementConfig {
                        reference_id: Some("UTR-QR-2".into()),
                        ..SettlementConfig::default()
                    },
                ),
            )
            .await
            .unwrap();
        let reversed = engine.update(&mut tx, settlement.id, &reverse_request()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(reversed.status, SettlementStatus::Reversed);
        assert!(reversed.rejected_at.is_some());
        let calc = p.store.calculation(p.vendor).unwrap();
        assert_eq!(calc.current_balance, Decimal::ZERO);
        assert_eq!(calc.net_balance, Decimal::ZERO);
        assert_eq!(calc.total_settlement_commission, Decimal::ZERO);
        assert_eq!(calc.total_settlement_amount, Decimal::ZERO);
        assert_eq!(calc.total_settlement_count, 2);
        assert_eq!(calc.config.internal_settlement, InternalSettlementTotals::default());
        assert_eq!(
            p.store.bank_response(response.id).unwrap().status,
            BankResponseStatus::Success
        );
    }

    #[tokio::test]
    async fn test_internal_transfer_requirements() {
        let p = parties();
        let engine = SettlementEngine::default();
        let mut tx = p.store.begin().await.unwrap();

        let with_utr = |utr: &str| SettlementConfig {
            reference_id: Some(utr.to_string()),
            ..SettlementConfig::default()
        };

        let err = engine
            .create(
                &mut tx,
                &create_request(&p, p.vendor, dec!(100), SettlementMethod::InternalQrTransfer, with_utr("MISSING")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let mut used = credit("USED");
        used.is_used = true;
        p.store.insert_bank_response(used);
        let err = engine
            .create(
                &mut tx,
                &create_request(&p, p.vendor, dec!(100), SettlementMethod::InternalQrTransfer, with_utr("USED")),
            )
            .await
            .unwrap_err();
        match err {
            AppError::BadRequest(msg) => assert_eq!(msg, "UTR is already used"),
            other => panic!("unexpected error: {:?}", other),
        }

        p.store.insert_bank_response(credit("FRESH"));
        let err = engine
            .create(
                &mut tx,
                &create_request(&p, p.vendor, dec!(0), SettlementMethod::InternalQrTransfer, with_utr("FRESH")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = engine
            .create(
                &mut tx,
                &create_request(&p, Uuid::new_v4(), dec!(100), SettlementMethod::InternalQrTransfer, with_utr("FRESH")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_non_internal_create_has_no_ledger_effect() {
        let p = parties();
        let engine = SettlementEngine::default();
        let mut tx = p.store.begin().await.unwrap();
        let settlement = engine
            .create(
                &mut tx,
                &create_request(
                    &p,
                    p.merchant,
                    dec!(250),
                    SettlementMethod::Other("CRYPTO".into()),
                    SettlementConfig {
                        debit_credit: Some(DebitCredit::Received),
                        ..SettlementConfig::default()
                    },
                ),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(settlement.status, SettlementStatus::Initiated);
        assert_eq!(settlement.amount, dec!(-250));
        assert_eq!(p.store.calculation(p.merchant).unwrap().current_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_merchant_approve_then_reverse_conserves_balance() {
        let p = parties();
        let engine = SettlementEngine::default();
        let mut tx = p.store.begin().await.unwrap();
        let settlement = engine
            .create(
                &mut tx,
                &create_request(&p, p.merchant, dec!(500), SettlementMethod::Bank, SettlementConfig::default()),
            )
            .await
            .unwrap();

        let approved = engine
            .update(&mut tx, settlement.id, &approve_request("UTR-M-1"))
            .await
            .unwrap();
        assert_eq!(approved.status, SettlementStatus::Success);
        assert!(approved.approved_at.is_some());
        let calc = p.store.calculation(p.merchant).unwrap();
        assert_eq!(calc.current_balance, dec!(-500));
        assert_eq!(calc.total_settlement_amount, dec!(500));

        engine.update(&mut tx, settlement.id, &reverse_request()).await.unwrap();
        tx.commit().await.unwrap();

        let calc = p.store.calculation(p.merchant).unwrap();
        assert_eq!(calc.current_balance, Decimal::ZERO);
        assert_eq!(calc.net_balance, Decimal::ZERO);
        assert_eq!(calc.total_settlement_amount, Decimal::ZERO);
        assert_eq!(calc.total_settlement_count, 2);
    }

    #[tokio::test]
    async fn test_approved_settlement_cannot_be_rejected_and_stays_reversible() {
        let p = parties();
        let engine = SettlementEngine::default();
        let mut tx = p.store.begin().await.unwrap();
        let settlement = engine
            .create(
                &mut tx,
                &create_request(&p, p.merchant, dec!(500), SettlementMethod::Bank, SettlementConfig::default()),
            )
            .await
            .unwrap();
        engine
            .update(&mut tx, settlement.id, &approve_request("UTR1"))
            .await
            .unwrap();

        let reject = UpdateSettlementRequest {
            amount: None,
            status: None,
            config: SettlementConfig {
                rejected_reason: Some("late".into()),
                ..SettlementConfig::default()
            },
            updated_by: Uuid::nil(),
        };
        let err = engine.update(&mut tx, settlement.id, &reject).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(p.store.settlement(settlement.id).unwrap().status, SettlementStatus::Success);
        assert_eq!(p.store.calculation(p.merchant).unwrap().current_balance, dec!(-500));

        let reversed = engine.update(&mut tx, settlement.id, &reverse_request()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(reversed.status, SettlementStatus::Reversed);
        assert_eq!(p.store.calculation(p.merchant).unwrap().current_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_vendor_bank_approve_and_reverse_moves_beneficiary() {
        let p = parties();
        let engine = SettlementEngine::default();
        let mut tx = p.store.begin().await.unwrap();
        let settlement = engine
            .create(
                &mut tx,
                &create_request(
                    &p,
                    p.vendor,
                    dec!(300),
                    SettlementMethod::Bank,
                    SettlementConfig {
                        bank_id: Some(p.beneficiary),
                        debit_credit: Some(DebitCredit::Send),
                        ..SettlementConfig::default()
                    },
                ),
            )
            .await
            .unwrap();

        let approved = engine
            .update(&mut tx, settlement.id, &approve_request("UTR-V-1"))
            .await
            .unwrap();
        assert_eq!(approved.config.beneficiary_initial_balance, Some(dec!(10000)));
        assert_eq!(approved.config.beneficiary_closing_balance, Some(dec!(9700)));
        assert_eq!(p.store.calculation(p.vendor).unwrap().current_balance, dec!(300));

        let reversed = engine.update(&mut tx, settlement.id, &reverse_request()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(reversed.config.beneficiary_closing_balance, Some(dec!(10000)));
        assert_eq!(
            p.store.beneficiary_account(p.beneficiary).unwrap().config.closing_balance,
            dec!(10000)
        );
        let calc = p.store.calculation(p.vendor).unwrap();
        assert_eq!(calc.current_balance, Decimal::ZERO);
        assert_eq!(calc.net_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_reject_has_no_ledger_effect_and_blocks_approval() {
        let p = parties();
        let engine = SettlementEngine::default();
        let mut tx = p.store.begin().await.unwrap();
        let settlement = engine
            .create(
                &mut tx,
                &create_request(&p, p.merchant, dec!(500), SettlementMethod::Bank, SettlementConfig::default()),
            )
            .await
            .unwrap();

        let rejected = engine
            .update(
                &mut tx,
                settlement.id,
                &UpdateSettlementRequest {
                    amount: None,
                    status: None,
                    config: SettlementConfig {
                        rejected_reason: Some("account closed".into()),
                        ..SettlementConfig::default()
                    },
                    updated_by: Uuid::nil(),
                },
            )
            .await
            .unwrap();
        assert_eq!(rejected.status, SettlementStatus::Rejected);
        assert!(rejected.rejected_at.is_some());

        let err = engine
            .update(&mut tx, settlement.id, &approve_request("UTR-LATE"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        tx.commit().await.unwrap();

        let calc = p.store.calculation(p.merchant).unwrap();
        assert_eq!(calc.current_balance, Decimal::ZERO);
        assert_eq!(calc.total_settlement_count, 0);
    }

    #[tokio::test]
    async fn test_update_persists_amount_and_merges_config() {
        let p = parties();
        let engine = SettlementEngine::default();
        let mut tx = p.store.begin().await.unwrap();
        let mut config = SettlementConfig::default();
        config.extra.insert("ifsc".into(), serde_json::json!("HDFC0001"));
        let settlement = engine
            .create(
                &mut tx,
                &create_request(&p, p.merchant, dec!(500), SettlementMethod::Bank, config),
            )
            .await
            .unwrap();

        let approved = engine
            .update(
                &mut tx,
                settlement.id,
                &UpdateSettlementRequest {
                    amount: Some(dec!(450)),
                    ..approve_request("UTR-AMT")
                },
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(approved.amount, dec!(450));
        assert_eq!(approved.config.reference_id.as_deref(), Some("UTR-AMT"));
        assert_eq!(approved.config.extra.get("ifsc").unwrap(), "HDFC0001");
        assert_eq!(p.store.calculation(p.merchant).unwrap().current_balance, dec!(-450));
    }

    #[tokio::test]
    async fn test_unknown_party_is_not_found() {
        let p = parties();
        let engine = SettlementEngine::default();
        let mut tx = p.store.begin().await.unwrap();
        let stranger = Uuid::new_v4();
        let settlement = engine
            .create(
                &mut tx,
                &create_request(&p, stranger, dec!(10), SettlementMethod::Bank, SettlementConfig::default()),
            )
            .await
            .unwrap();
        let err = engine
            .update(&mut tx, settlement.id, &approve_request("UTR-X"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_marks_obsolete() {
        let p = parties();
        let engine = SettlementEngine::default();
        let actor = Actor { user_id: Uuid::new_v4(), company_id: p.company_id };
        let mut tx = p.store.begin().await.unwrap();
        let settlement = engine
            .create(
                &mut tx,
                &create_request(&p, p.merchant, dec!(10), SettlementMethod::Bank, SettlementConfig::default()),
            )
            .await
            .unwrap();
        let deleted = engine.delete(&mut tx, settlement.id, &actor).await.unwrap();
        assert!(deleted.is_obsolete);
        assert_eq!(deleted.updated_by, actor.user_id);

        let err = engine
            .update(&mut tx, settlement.id, &approve_request("UTR-GONE"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
