//! Transactional façade over the engines.
//!
//! Every operation runs in its own transaction: begin, run the engine, commit
//! on success and roll back on error. Lock conflicts are replayed from scratch
//! a bounded number of times; every other error is returned as is.

use std::time::Duration;

use tracing::{error, warn};
use uuid::Uuid;

use crate::chargeback::ChargebackEngine;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::ledger::models::*;
use crate::ledger::store::{LedgerStore, LedgerTx};
use crate::lock::LockPolicy;
use crate::settlement::SettlementEngine;

const RETRY_BACKOFF: Duration = Duration::from_millis(25);

/// Run `$body` inside a fresh transaction bound to `$tx`, retrying on
/// `ConcurrencyConflict`.
macro_rules! transactional {
    ($service:expr, $operation:literal, |$tx:ident| $body:expr) => {{
        let mut attempt: u32 = 0;
        loop {
            let mut $tx = $service.store.begin().await?;
            let result = $body;
            match result {
                Ok(value) => {
                    $tx.commit().await?;
                    break Ok(value);
                }
                Err(err) => {
                    if let Err(rollback_err) = $tx.rollback().await {
                        error!(
                            operation = $operation,
                            error = %rollback_err,
                            "Rollback failed"
                        );
                    }
                    if err.is_retryable() && attempt < $service.max_conflict_retries {
                        attempt += 1;
                        warn!(
                            operation = $operation,
                            attempt,
                            error = %err,
                            "Conflict, retrying transaction"
                        );
                        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                        continue;
                    }
                    error!(
                        operation = $operation,
                        code = err.error_code(),
                        error = %err,
                        "Operation rolled back"
                    );
                    break Err(err);
                }
            }
        }
    }};
}

pub struct LedgerService<S: LedgerStore> {
    store: S,
    settlements: SettlementEngine,
    chargebacks: ChargebackEngine,
    max_conflict_retries: u32,
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(store: S, lock_policy: LockPolicy, commission_scale: u32, max_conflict_retries: u32) -> Self {
        Self {
            store,
            settlements: SettlementEngine::new(lock_policy, commission_scale),
            chargebacks: ChargebackEngine::new(),
            max_conflict_retries,
        }
    }

    pub fn from_config(store: S, config: &Config) -> AppResult<Self> {
        Ok(Self::new(
            store,
            config.lock_policy()?,
            config.commission_scale,
            config.max_conflict_retries,
        ))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ========== LEDGER ==========

    /// Zeroed ledger row for a newly onboarded merchant or vendor
    pub async fn open_calculation(&self, user_id: Uuid, company_id: Uuid) -> AppResult<Calculation> {
        transactional!(self, "open_calculation", |tx| {
            tx.create_calculation(&Calculation::new(user_id, company_id)).await
        })
    }

    // ========== CHARGEBACKS ==========

    pub async fn create_chargeback(
        &self,
        payin_id: Uuid,
        request: &CreateChargeBackRequest,
        actor: &Actor,
    ) -> AppResult<ChargeBack> {
        transactional!(self, "create_chargeback", |tx| {
            match tx.find_payin(payin_id, actor.company_id).await {
                Ok(Some(payin)) => self.chargebacks.create(&mut tx, &payin, request, actor).await,
                Ok(None) => Err(AppError::NotFound(format!("PayIn not found: {}", payin_id))),
                Err(e) => Err(e),
            }
        })
    }

    pub async fn update_chargeback(
        &self,
        id: Uuid,
        company_id: Uuid,
        request: &UpdateChargeBackRequest,
    ) -> AppResult<ChargeBack> {
        transactional!(self, "update_chargeback", |tx| {
            self.chargebacks.update(&mut tx, id, company_id, request).await
        })
    }

    pub async fn block_chargeback_user(&self, chargeback_id: Uuid, company_id: Uuid) -> AppResult<Company> {
        transactional!(self, "block_chargeback_user", |tx| {
            self.chargebacks.block_user(&mut tx, chargeback_id, company_id).await
        })
    }

    pub async fn delete_chargeback(&self, id: Uuid, actor: &Actor) -> AppResult<ChargeBack> {
        transactional!(self, "delete_chargeback", |tx| {
            self.chargebacks.delete(&mut tx, id, actor.company_id, actor).await
        })
    }

    pub async fn get_chargeback(&self, id: Uuid, company_id: Uuid) -> AppResult<ChargeBack> {
        transactional!(self, "get_chargeback", |tx| {
            match tx.get_chargeback(id, company_id).await {
                Ok(Some(chargeback)) => Ok(chargeback),
                Ok(None) => Err(AppError::NotFound(format!("Chargeback not found: {}", id))),
                Err(e) => Err(e),
            }
        })
    }

    // ========== SETTLEMENTS ==========

    pub async fn create_settlement(&self, request: &CreateSettlementRequest) -> AppResult<Settlement> {
        transactional!(self, "create_settlement", |tx| {
            self.settlements.create(&mut tx, request).await
        })
    }

    pub async fn update_settlement(
        &self,
        id: Uuid,
        request: &UpdateSettlementRequest,
    ) -> AppResult<Settlement> {
        transactional!(self, "update_settlement", |tx| {
            self.settlements.update(&mut tx, id, request).await
        })
    }

    pub async fn delete_settlement(&self, id: Uuid, actor: &Actor) -> AppResult<Settlement> {
        transactional!(self, "delete_settlement", |tx| {
            self.settlements.delete(&mut tx, id, actor).await
        })
    }

    pub async fn get_settlement(&self, id: Uuid, company_id: Uuid) -> AppResult<Settlement> {
        transactional!(self, "get_settlement", |tx| {
            match tx.get_settlement(id).await {
                Ok(Some(settlement)) if settlement.company_id == company_id => Ok(settlement),
                Ok(_) => Err(AppError::NotFound(format!("Settlement not found: {}", id))),
                Err(e) => Err(e),
            }
        })
    }
}
