use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::models::*;
use super::store::{LedgerStore, LedgerTx};
use crate::error::{AppError, AppResult};
use crate::lock::{LockKey, LockPolicy};

const CALCULATION_COLUMNS: &str = r#"
    id, user_id, company_id,
    total_chargeback_count, total_chargeback_amount,
    total_settlement_count, total_settlement_amount, total_settlement_commission,
    current_balance, net_balance, config, created_at, updated_at
"#;

const CHARGEBACK_COLUMNS: &str = r#"
    id, merchant_user_id, vendor_user_id, payin_id, bank_acc_id, amount,
    reference_date, company_id, config, is_obsolete,
    created_by, updated_by, created_at, updated_at
"#;

const SETTLEMENT_COLUMNS: &str = r#"
    id, user_id, company_id, amount, method, status, config,
    approved_at, rejected_at, is_obsolete,
    created_by, updated_by, created_at, updated_at
"#;

const BANK_RESPONSE_COLUMNS: &str =
    "id, bank_id, utr, amount, status, is_used, created_at, updated_at";

const BENEFICIARY_COLUMNS: &str = "id, company_id, user_id, config, updated_at";

// ========== ROW MAPPING ==========

impl Calculation {
    pub fn from_row(row: &PgRow) -> AppResult<Self> {
        let config: Option<Json<CalculationConfig>> = row.try_get("config")?;
        Ok(Calculation {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            company_id: row.try_get("company_id")?,
            total_chargeback_count: row.try_get("total_chargeback_count")?,
            total_chargeback_amount: row.try_get("total_chargeback_amount")?,
            total_settlement_count: row.try_get("total_settlement_count")?,
            total_settlement_amount: row.try_get("total_settlement_amount")?,
            total_settlement_commission: row.try_get("total_settlement_commission")?,
            current_balance: row.try_get("current_balance")?,
            net_balance: row.try_get("net_balance")?,
            config: config.map(|c| c.0).unwrap_or_default(),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl ChargeBack {
    pub fn from_row(row: &PgRow) -> AppResult<Self> {
        let config: Option<Json<BlockListConfig>> = row.try_get("config")?;
        Ok(ChargeBack {
            id: row.try_get("id")?,
            merchant_user_id: row.try_get("merchant_user_id")?,
            vendor_user_id: row.try_get("vendor_user_id")?,
            payin_id: row.try_get("payin_id")?,
            bank_acc_id: row.try_get("bank_acc_id")?,
            amount: row.try_get("amount")?,
            reference_date: row.try_get("reference_date")?,
            company_id: row.try_get("company_id")?,
            config: config.map(|c| c.0).unwrap_or_default(),
            is_obsolete: row.try_get("is_obsolete")?,
            created_by: row.try_get("created_by")?,
            updated_by: row.try_get("updated_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Settlement {
    pub fn from_row(row: &PgRow) -> AppResult<Self> {
        let method: String = row.try_get("method")?;
        let status: String = row.try_get("status")?;
        let config: Option<Json<SettlementConfig>> = row.try_get("config")?;
        Ok(Settlement {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            company_id: row.try_get("company_id")?,
            amount: row.try_get("amount")?,
            method: SettlementMethod::from(method.as_str()),
            status: status.parse()?,
            config: config.map(|c| c.0).unwrap_or_default(),
            approved_at: row.try_get("approved_at")?,
            rejected_at: row.try_get("rejected_at")?,
            is_obsolete: row.try_get("is_obsolete")?,
            created_by: row.try_get("created_by")?,
            updated_by: row.try_get("updated_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl BankResponse {
    pub fn from_row(row: &PgRow) -> AppResult<Self> {
        let status: String = row.try_get("status")?;
        Ok(BankResponse {
            id: row.try_get("id")?,
            bank_id: row.try_get("bank_id")?,
            utr: row.try_get("utr")?,
            amount: row.try_get("amount")?,
            status: BankResponseStatus::from(status.as_str()),
            is_used: row.try_get("is_used")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl BeneficiaryAccount {
    pub fn from_row(row: &PgRow) -> AppResult<Self> {
        let config: Option<Json<BeneficiaryConfig>> = row.try_get("config")?;
        Ok(BeneficiaryAccount {
            id: row.try_get("id")?,
            company_id: row.try_get("company_id")?,
            user_id: row.try_get("user_id")?,
            config: config.map(|c| c.0).unwrap_or_default(),
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Company {
    pub fn from_row(row: &PgRow) -> AppResult<Self> {
        let config: Option<Json<BlockListConfig>> = row.try_get("config")?;
        Ok(Company {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            config: config.map(|c| c.0).unwrap_or_default(),
            updated_at: row.try_get("updated_at")?,
        })
    }
}

// ========== STORE ==========

/// Postgres-backed ledger store - THE source of truth for balances
#[derive(Clone)]
pub struct PgLedgerStore {
    pub pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> AppResult<PgLedgerTx> {
        let tx = self.pool.begin().await?;
        Ok(PgLedgerTx { tx })
    }
}

/// One Postgres transaction. `sqlx` rolls back on drop if neither
/// `commit` nor `rollback` was called.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn commit(self) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> AppResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    async fn acquire_advisory_lock(&mut self, key: LockKey, policy: LockPolicy) -> AppResult<()> {
        match policy {
            LockPolicy::FailFast => {
                let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
                    .bind(key.value())
                    .fetch_one(&mut *self.tx)
                    .await?;

                if !acquired {
                    return Err(AppError::ConcurrencyConflict(format!(
                        "Edit lock {} is held by another transaction",
                        key
                    )));
                }
            }
            LockPolicy::Wait { timeout } => {
                sqlx::query("SELECT set_config('lock_timeout', $1, true)")
                    .bind(format!("{}ms", timeout.as_millis()))
                    .execute(&mut *self.tx)
                    .await?;

                sqlx::query("SELECT pg_advisory_xact_lock($1)")
                    .bind(key.value())
                    .execute(&mut *self.tx)
                    .await
                    .map_err(|e| AppError::from_lock_wait(e, key.value()))?;

                sqlx::query("SET LOCAL lock_timeout TO DEFAULT")
                    .execute(&mut *self.tx)
                    .await?;
            }
        }

        Ok(())
    }

    // ========== CALCULATIONS ==========

    async fn create_calculation(&mut self, calculation: &Calculation) -> AppResult<Calculation> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO calculations (
                id, user_id, company_id,
                total_chargeback_count, total_chargeback_amount,
                total_settlement_count, total_settlement_amount, total_settlement_commission,
                current_balance, net_balance, config, created_at, updated_at
            ) VALUES ($1, $2, $3, 0, 0, 0, 0, 0, 0, 0, $4, $5, $5)
            ON CONFLICT (user_id) DO NOTHING
            RETURNING {CALCULATION_COLUMNS}
            "#
        ))
        .bind(calculation.id)
        .bind(calculation.user_id)
        .bind(calculation.company_id)
        .bind(Json(&calculation.config))
        .bind(calculation.created_at)
        .fetch_optional(&mut *self.tx)
        .await?;

        match inserted {
            Some(row) => {
                info!(user_id = %calculation.user_id, "Calculation row created");
                Calculation::from_row(&row)
            }
            None => self.get_calculation(calculation.user_id).await?.ok_or_else(|| {
                AppError::Internal(format!(
                    "Calculation for user {} vanished after conflict",
                    calculation.user_id
                ))
            }),
        }
    }

    async fn get_calculation(&mut self, user_id: Uuid) -> AppResult<Option<Calculation>> {
        let row = sqlx::query(&format!(
            "SELECT {CALCULATION_COLUMNS} FROM calculations WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(Calculation::from_row).transpose()
    }

    async fn apply_calculation_delta(
        &mut self,
        user_id: Uuid,
        delta: &CalculationDelta,
    ) -> AppResult<Calculation> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE calculations
            SET total_chargeback_count = total_chargeback_count + $2,
                total_chargeback_amount = total_chargeback_amount + $3,
                total_settlement_count = total_settlement_count + $4,
                total_settlement_amount = total_settlement_amount + $5,
                total_settlement_commission = total_settlement_commission + $6,
                current_balance = current_balance + $7,
                net_balance = net_balance + $8,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {CALCULATION_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(delta.total_chargeback_count)
        .bind(delta.total_chargeback_amount)
        .bind(delta.total_settlement_count)
        .bind(delta.total_settlement_amount)
        .bind(delta.total_settlement_commission)
        .bind(delta.current_balance)
        .bind(delta.net_balance)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Calculation not found for user {}", user_id)))?;

        debug!(
            user_id = %user_id,
            current_delta = %delta.current_balance,
            net_delta = %delta.net_balance,
            "Calculation delta applied"
        );

        Calculation::from_row(&row)
    }

    async fn apply_internal_settlement_delta(
        &mut self,
        user_id: Uuid,
        delta: &InternalSettlementTotals,
    ) -> AppResult<InternalSettlementTotals> {
        let config: Json<CalculationConfig> = sqlx::query_scalar(
            r#"
            UPDATE calculations
            SET config = COALESCE(config, '{}'::jsonb) || jsonb_build_object(
                    'total_internalSettlement_amount',
                    COALESCE((config->>'total_internalSettlement_amount')::numeric, 0) + $2,
                    'total_internalSettlement_count',
                    COALESCE((config->>'total_internalSettlement_count')::bigint, 0) + $3,
                    'total_internalSettlement_commission',
                    COALESCE((config->>'total_internalSettlement_commission')::numeric, 0) + $4
                ),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING config
            "#,
        )
        .bind(user_id)
        .bind(delta.amount)
        .bind(delta.count)
        .bind(delta.commission)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Calculation not found for user {}", user_id)))?;

        Ok(config.0.internal_settlement)
    }

    // ========== PARTIES ==========

    async fn find_merchant(&mut self, user_id: Uuid) -> AppResult<Option<Merchant>> {
        let row = sqlx::query(
            "SELECT id, user_id, company_id, code FROM merchants WHERE user_id = $1 AND is_obsolete = false",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|r| -> AppResult<Merchant> {
            Ok(Merchant {
                id: r.try_get("id")?,
                user_id: r.try_get("user_id")?,
                company_id: r.try_get("company_id")?,
                code: r.try_get("code")?,
            })
        })
        .transpose()
    }

    async fn find_vendor(&mut self, user_id: Uuid) -> AppResult<Option<Vendor>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, company_id, code, payin_commission
            FROM vendors
            WHERE user_id = $1 AND is_obsolete = false
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|r| -> AppResult<Vendor> {
            Ok(Vendor {
                id: r.try_get("id")?,
                user_id: r.try_get("user_id")?,
                company_id: r.try_get("company_id")?,
                code: r.try_get("code")?,
                payin_commission: r.try_get("payin_commission")?,
            })
        })
        .transpose()
    }

    async fn find_payin(&mut self, payin_id: Uuid, company_id: Uuid) -> AppResult<Option<PayIn>> {
        let row = sqlx::query(
            r#"
            SELECT id, company_id, merchant_user_id, vendor_user_id, bank_acc_id, end_user_id, user_ip
            FROM payins
            WHERE id = $1 AND company_id = $2 AND is_obsolete = false
            "#,
        )
        .bind(payin_id)
        .bind(company_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|r| -> AppResult<PayIn> {
            Ok(PayIn {
                id: r.try_get("id")?,
                company_id: r.try_get("company_id")?,
                merchant_user_id: r.try_get("merchant_user_id")?,
                vendor_user_id: r.try_get("vendor_user_id")?,
                bank_acc_id: r.try_get("bank_acc_id")?,
                end_user_id: r.try_get("end_user_id")?,
                user_ip: r.try_get("user_ip")?,
            })
        })
        .transpose()
    }

    async fn get_company(&mut self, company_id: Uuid) -> AppResult<Option<Company>> {
        let row = sqlx::query("SELECT id, name, config, updated_at FROM companies WHERE id = $1")
            .bind(company_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        row.as_ref().map(Company::from_row).transpose()
    }

    async fn update_company_config(
        &mut self,
        company_id: Uuid,
        config: &BlockListConfig,
    ) -> AppResult<Company> {
        let row = sqlx::query(
            r#"
            UPDATE companies
            SET config = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, name, config, updated_at
            "#,
        )
        .bind(company_id)
        .bind(Json(config))
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Company not found: {}", company_id)))?;

        Company::from_row(&row)
    }

    // ========== CHARGEBACKS ==========

    async fn insert_chargeback(&mut self, chargeback: &NewChargeBack) -> AppResult<ChargeBack> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO charge_backs (
                id, merchant_user_id, vendor_user_id, payin_id, bank_acc_id, amount,
                reference_date, company_id, config, is_obsolete, created_by, updated_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, '{{}}'::jsonb, false, $9, $9)
            RETURNING {CHARGEBACK_COLUMNS}
            "#
        ))
        .bind(chargeback.id)
        .bind(chargeback.merchant_user_id)
        .bind(chargeback.vendor_user_id)
        .bind(chargeback.payin_id)
        .bind(chargeback.bank_acc_id)
        .bind(chargeback.amount)
        .bind(chargeback.reference_date)
        .bind(chargeback.company_id)
        .bind(chargeback.created_by)
        .fetch_one(&mut *self.tx)
        .await?;

        ChargeBack::from_row(&row)
    }

    async fn get_chargeback(&mut self, id: Uuid, company_id: Uuid) -> AppResult<Option<ChargeBack>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {CHARGEBACK_COLUMNS}
            FROM charge_backs
            WHERE id = $1 AND company_id = $2 AND is_obsolete = false
            "#
        ))
        .bind(id)
        .bind(company_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(ChargeBack::from_row).transpose()
    }

    async fn update_chargeback_amount(
        &mut self,
        id: Uuid,
        amount: Decimal,
        reference_date: Option<NaiveDate>,
        updated_by: Uuid,
    ) -> AppResult<ChargeBack> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE charge_backs
            SET amount = $2,
                reference_date = COALESCE($3, reference_date),
                updated_by = $4,
                updated_at = NOW()
            WHERE id = $1 AND is_obsolete = false
            RETURNING {CHARGEBACK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(amount)
        .bind(reference_date)
        .bind(updated_by)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Chargeback not found: {}", id)))?;

        ChargeBack::from_row(&row)
    }

    async fn update_chargeback_config(
        &mut self,
        id: Uuid,
        config: &BlockListConfig,
    ) -> AppResult<ChargeBack> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE charge_backs
            SET config = $2, updated_at = NOW()
            WHERE id = $1 AND is_obsolete = false
            RETURNING {CHARGEBACK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(Json(config))
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Chargeback not found: {}", id)))?;

        ChargeBack::from_row(&row)
    }

    async fn mark_chargeback_obsolete(&mut self, id: Uuid, updated_by: Uuid) -> AppResult<ChargeBack> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE charge_backs
            SET is_obsolete = true, updated_by = $2, updated_at = NOW()
            WHERE id = $1 AND is_obsolete = false
            RETURNING {CHARGEBACK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(updated_by)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Chargeback not found: {}", id)))?;

        ChargeBack::from_row(&row)
    }

    // ========== SETTLEMENTS ==========

    async fn insert_settlement(&mut self, settlement: &Settlement) -> AppResult<Settlement> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO settlements (
                id, user_id, company_id, amount, method, status, config,
                approved_at, rejected_at, is_obsolete,
                created_by, updated_by, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, false, $10, $11, $12, $13)
            RETURNING {SETTLEMENT_COLUMNS}
            "#
        ))
        .bind(settlement.id)
        .bind(settlement.user_id)
        .bind(settlement.company_id)
        .bind(settlement.amount)
        .bind(settlement.method.as_str())
        .bind(settlement.status.as_str())
        .bind(Json(&settlement.config))
        .bind(settlement.approved_at)
        .bind(settlement.rejected_at)
        .bind(settlement.created_by)
        .bind(settlement.updated_by)
        .bind(settlement.created_at)
        .bind(settlement.updated_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Settlement::from_row(&row)
    }

    async fn get_settlement(&mut self, id: Uuid) -> AppResult<Option<Settlement>> {
        let row = sqlx::query(&format!(
            "SELECT {SETTLEMENT_COLUMNS} FROM settlements WHERE id = $1 AND is_obsolete = false"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(Settlement::from_row).transpose()
    }

    async fn save_settlement(&mut self, settlement: &Settlement) -> AppResult<Settlement> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE settlements
            SET amount = $2,
                status = $3,
                config = $4,
                approved_at = $5,
                rejected_at = $6,
                updated_by = $7,
                updated_at = NOW()
            WHERE id = $1 AND is_obsolete = false
            RETURNING {SETTLEMENT_COLUMNS}
            "#
        ))
        .bind(settlement.id)
        .bind(settlement.amount)
        .bind(settlement.status.as_str())
        .bind(Json(&settlement.config))
        .bind(settlement.approved_at)
        .bind(settlement.rejected_at)
        .bind(settlement.updated_by)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Settlement not found: {}", settlement.id)))?;

        Settlement::from_row(&row)
    }

    async fn mark_settlement_obsolete(&mut self, id: Uuid, updated_by: Uuid) -> AppResult<Settlement> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE settlements
            SET is_obsolete = true, updated_by = $2, updated_at = NOW()
            WHERE id = $1 AND is_obsolete = false
            RETURNING {SETTLEMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(updated_by)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Settlement not found: {}", id)))?;

        Settlement::from_row(&row)
    }

    // ========== BANK RESPONSES ==========

    async fn find_bank_response_by_utr(
        &mut self,
        utr: &str,
        status: Option<&BankResponseStatus>,
    ) -> AppResult<Option<BankResponse>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {BANK_RESPONSE_COLUMNS}
            FROM bank_responses
            WHERE utr = $1
              AND ($2::text IS NULL OR status = $2)
              AND is_obsolete = false
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(utr)
        .bind(status.map(|s| s.as_str().to_string()))
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(BankResponse::from_row).transpose()
    }

    async fn transition_bank_response(
        &mut self,
        id: Uuid,
        from: &BankResponseStatus,
        to: &BankResponseStatus,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE bank_responses
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2 AND is_used = false
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ========== BENEFICIARY ACCOUNTS ==========

    async fn get_beneficiary_account(&mut self, id: Uuid) -> AppResult<Option<BeneficiaryAccount>> {
        let row = sqlx::query(&format!(
            "SELECT {BENEFICIARY_COLUMNS} FROM beneficiary_accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(BeneficiaryAccount::from_row).transpose()
    }

    async fn adjust_beneficiary_closing_balance(
        &mut self,
        id: Uuid,
        delta: Decimal,
    ) -> AppResult<BeneficiaryAccount> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE beneficiary_accounts
            SET config = COALESCE(config, '{{}}'::jsonb) || jsonb_build_object(
                    'closing_balance',
                    COALESCE((config->>'closing_balance')::numeric, 0) + $2
                ),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {BENEFICIARY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Beneficiary account not found: {}", id)))?;

        BeneficiaryAccount::from_row(&row)
    }
}
