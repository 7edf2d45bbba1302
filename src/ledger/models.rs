use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

/// Who is performing an operation, for audit columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub company_id: Uuid,
}

/// Whether a ledger owner is a merchant or a vendor. Drives the sign
/// convention of settlement approvals and reversals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyKind {
    Merchant,
    Vendor,
}

// ========== CALCULATION (LEDGER ROW) ==========

/// Running totals of internal-transfer settlements, kept inside the
/// calculation's `config` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalSettlementTotals {
    #[serde(rename = "total_internalSettlement_amount", default)]
    pub amount: Decimal,
    #[serde(rename = "total_internalSettlement_count", default)]
    pub count: i64,
    #[serde(rename = "total_internalSettlement_commission", default)]
    pub commission: Decimal,
}

impl InternalSettlementTotals {
    pub fn settled(amount: Decimal, commission: Decimal) -> Self {
        Self { amount, count: 1, commission }
    }

    pub fn negate(&self) -> Self {
        Self {
            amount: -self.amount,
            count: -self.count,
            commission: -self.commission,
        }
    }

    /// Accumulate `delta`; absent totals start from zero and may go negative.
    pub fn accumulate(&self, delta: &InternalSettlementTotals) -> Self {
        Self {
            amount: self.amount + delta.amount,
            count: self.count + delta.count,
            commission: self.commission + delta.commission,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalculationConfig {
    #[serde(flatten)]
    pub internal_settlement: InternalSettlementTotals,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-user ledger row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calculation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub total_chargeback_count: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_chargeback_amount: Decimal,
    pub total_settlement_count: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_settlement_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_settlement_commission: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub current_balance: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub net_balance: Decimal,
    pub config: CalculationConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Calculation {
    pub fn new(user_id: Uuid, company_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            company_id,
            total_chargeback_count: 0,
            total_chargeback_amount: Decimal::ZERO,
            total_settlement_count: 0,
            total_settlement_amount: Decimal::ZERO,
            total_settlement_commission: Decimal::ZERO,
            current_balance: Decimal::ZERO,
            net_balance: Decimal::ZERO,
            config: CalculationConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// In-process mirror of the repository's relative update.
    pub fn apply(&mut self, delta: &CalculationDelta) {
        self.total_chargeback_count += delta.total_chargeback_count;
        self.total_chargeback_amount += delta.total_chargeback_amount;
        self.total_settlement_count += delta.total_settlement_count;
        self.total_settlement_amount += delta.total_settlement_amount;
        self.total_settlement_commission += delta.total_settlement_commission;
        self.current_balance += delta.current_balance;
        self.net_balance += delta.net_balance;
        self.updated_at = Utc::now();
    }
}

/// Relative change to a calculation row. Every field is added to the stored
/// value; nothing is ever overwritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalculationDelta {
    pub total_chargeback_count: i64,
    pub total_chargeback_amount: Decimal,
    pub total_settlement_count: i64,
    pub total_settlement_amount: Decimal,
    pub total_settlement_commission: Decimal,
    pub current_balance: Decimal,
    pub net_balance: Decimal,
}

impl CalculationDelta {
    /// A chargeback (or a chargeback amendment of `amount`) debits the ledger.
    pub fn chargeback(amount: Decimal) -> Self {
        Self {
            total_chargeback_count: 1,
            total_chargeback_amount: amount,
            current_balance: -amount,
            net_balance: -amount,
            ..Self::default()
        }
    }

    /// Settlement event moving `balance_change` into both running balances.
    pub fn settlement(amount: Decimal, commission: Decimal, balance_change: Decimal) -> Self {
        Self {
            total_settlement_count: 1,
            total_settlement_amount: amount,
            total_settlement_commission: commission,
            current_balance: balance_change,
            net_balance: balance_change,
            ..Self::default()
        }
    }

    pub fn negate(&self) -> Self {
        Self {
            total_chargeback_count: -self.total_chargeback_count,
            total_chargeback_amount: -self.total_chargeback_amount,
            total_settlement_count: -self.total_settlement_count,
            total_settlement_amount: -self.total_settlement_amount,
            total_settlement_commission: -self.total_settlement_commission,
            current_balance: -self.current_balance,
            net_balance: -self.net_balance,
        }
    }
}

// ========== PARTIES ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vendor {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub code: String,
    /// Percentage, 2.5 means 2.5%
    #[serde(with = "rust_decimal::serde::float")]
    pub payin_commission: Decimal,
}

/// The slice of a PayIn the ledger core needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayIn {
    pub id: Uuid,
    pub company_id: Uuid,
    pub merchant_user_id: Uuid,
    pub vendor_user_id: Uuid,
    pub bank_acc_id: Uuid,
    /// End customer identifier supplied by the merchant
    pub end_user_id: Option<String>,
    pub user_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedUser {
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub user_ip: Option<String>,
}

/// Company-level config blob; only the block list is typed, the rest is
/// carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockListConfig {
    #[serde(default)]
    pub blocked_users: Vec<BlockedUser>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BlockListConfig {
    pub fn is_blocked(&self, entry: &BlockedUser) -> bool {
        self.blocked_users.iter().any(|b| b == entry)
    }

    /// Remove `entry` if present, add it otherwise. Returns true when the
    /// entry ended up blocked.
    pub fn toggle(&mut self, entry: BlockedUser) -> bool {
        if self.is_blocked(&entry) {
            self.blocked_users.retain(|b| b != &entry);
            false
        } else {
            self.blocked_users.push(entry);
            true
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub config: BlockListConfig,
    pub updated_at: DateTime<Utc>,
}

// ========== CHARGEBACK ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeBack {
    pub id: Uuid,
    pub merchant_user_id: Uuid,
    pub vendor_user_id: Uuid,
    pub payin_id: Uuid,
    pub bank_acc_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub reference_date: Option<NaiveDate>,
    pub company_id: Uuid,
    pub config: BlockListConfig,
    pub is_obsolete: bool,
    pub created_by: Uuid,
    pub updated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChargeBack {
    /// Chargebacks may only be amended on the (UTC) day they were raised.
    pub fn is_editable_on(&self, today: NaiveDate) -> bool {
        self.created_at.date_naive() == today
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChargeBackRequest {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub reference_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateChargeBackRequest {
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub reference_date: Option<NaiveDate>,
    pub updated_by: Uuid,
}

/// Row ready to be inserted; ids and timestamps are assigned by the caller.
#[derive(Debug, Clone)]
pub struct NewChargeBack {
    pub id: Uuid,
    pub merchant_user_id: Uuid,
    pub vendor_user_id: Uuid,
    pub payin_id: Uuid,
    pub bank_acc_id: Uuid,
    pub amount: Decimal,
    pub reference_date: Option<NaiveDate>,
    pub company_id: Uuid,
    pub created_by: Uuid,
}

// ========== SETTLEMENT ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Initiated,
    Success,
    Rejected,
    Reversed,
    Bot,
}

impl SettlementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementStatus::Initiated => "INITIATED",
            SettlementStatus::Success => "SUCCESS",
            SettlementStatus::Rejected => "REJECTED",
            SettlementStatus::Reversed => "REVERSED",
            SettlementStatus::Bot => "BOT",
        }
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SettlementStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "INITIATED" => Ok(SettlementStatus::Initiated),
            "SUCCESS" => Ok(SettlementStatus::Success),
            "REJECTED" => Ok(SettlementStatus::Rejected),
            "REVERSED" => Ok(SettlementStatus::Reversed),
            "BOT" => Ok(SettlementStatus::Bot),
            other => Err(AppError::Validation(format!("Unknown settlement status: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SettlementMethod {
    Bank,
    InternalQrTransfer,
    InternalBankTransfer,
    /// Any other method (cash, crypto, ...), stored verbatim
    Other(String),
}

impl SettlementMethod {
    pub fn as_str(&self) -> &str {
        match self {
            SettlementMethod::Bank => "BANK",
            SettlementMethod::InternalQrTransfer => "INTERNAL_QR_TRANSFER",
            SettlementMethod::InternalBankTransfer => "INTERNAL_BANK_TRANSFER",
            SettlementMethod::Other(method) => method,
        }
    }

    /// Internal transfers are backed by a bank credit the vendor already holds
    pub fn is_internal_transfer(&self) -> bool {
        matches!(
            self,
            SettlementMethod::InternalQrTransfer | SettlementMethod::InternalBankTransfer
        )
    }
}

impl fmt::Display for SettlementMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for SettlementMethod {
    fn from(s: &str) -> Self {
        match s {
            "BANK" => SettlementMethod::Bank,
            "INTERNAL_QR_TRANSFER" => SettlementMethod::InternalQrTransfer,
            "INTERNAL_BANK_TRANSFER" => SettlementMethod::InternalBankTransfer,
            other => SettlementMethod::Other(other.to_string()),
        }
    }
}

impl Serialize for SettlementMethod {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SettlementMethod {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SettlementMethod::from(s.as_str()))
    }
}

/// Direction of money for manual settlements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebitCredit {
    #[serde(rename = "RECEIVED", alias = "received")]
    Received,
    #[serde(rename = "send", alias = "SEND")]
    Send,
}

/// Typed settlement `config` column. Bank snapshot fields the core does not
/// interpret are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// UTR of the bank transfer backing this settlement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debit_credit: Option<DebitCredit>,
    /// Beneficiary account moved by vendor BANK settlements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary_initial_balance: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary_closing_balance: Option<Decimal>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SettlementConfig {
    pub fn has_reference(&self) -> bool {
        self.reference_id.as_deref().is_some_and(|r| !r.is_empty())
    }

    pub fn has_rejection(&self) -> bool {
        self.rejected_reason.as_deref().is_some_and(|r| !r.is_empty())
    }

    /// Overlay the fields set in `patch` onto `self`.
    pub fn merge(&mut self, patch: &SettlementConfig) {
        if patch.reference_id.is_some() {
            self.reference_id = patch.reference_id.clone();
        }
        if patch.rejected_reason.is_some() {
            self.rejected_reason = patch.rejected_reason.clone();
        }
        if patch.debit_credit.is_some() {
            self.debit_credit = patch.debit_credit;
        }
        if patch.bank_id.is_some() {
            self.bank_id = patch.bank_id;
        }
        if patch.beneficiary_initial_balance.is_some() {
            self.beneficiary_initial_balance = patch.beneficiary_initial_balance;
        }
        if patch.beneficiary_closing_balance.is_some() {
            self.beneficiary_closing_balance = patch.beneficiary_closing_balance;
        }
        for (key, value) in &patch.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Uuid,
    pub user_id: Uuid,
    pub company_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub method: SettlementMethod,
    pub status: SettlementStatus,
    pub config: SettlementConfig,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub is_obsolete: bool,
    pub created_by: Uuid,
    pub updated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSettlementRequest {
    pub user_id: Uuid,
    pub company_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub method: SettlementMethod,
    #[serde(default)]
    pub config: SettlementConfig,
    pub created_by: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSettlementRequest {
    /// Amount the transition applies to; defaults to the stored amount
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub amount: Option<Decimal>,
    /// `INITIATED` requests a reversal
    pub status: Option<SettlementStatus>,
    #[serde(default)]
    pub config: SettlementConfig,
    pub updated_by: Uuid,
}

// ========== BANK RESPONSE ==========

/// Consumption marker of a bank credit
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BankResponseStatus {
    /// Credit confirmed by the bank bot and free to be claimed
    Success,
    /// Claimed by an internal-transfer settlement
    InternalTransfer,
    Other(String),
}

impl BankResponseStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BankResponseStatus::Success => "/success",
            BankResponseStatus::InternalTransfer => "/internalTransfer",
            BankResponseStatus::Other(status) => status,
        }
    }
}

impl From<&str> for BankResponseStatus {
    fn from(s: &str) -> Self {
        match s {
            "/success" => BankResponseStatus::Success,
            "/internalTransfer" => BankResponseStatus::InternalTransfer,
            other => BankResponseStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for BankResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BankResponse {
    pub id: Uuid,
    pub bank_id: Uuid,
    pub utr: String,
    pub amount: Decimal,
    pub status: BankResponseStatus,
    pub is_used: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BankResponse {
    /// A bot-confirmed credit nobody has claimed yet
    pub fn is_claimable(&self) -> bool {
        !self.is_used && self.status == BankResponseStatus::Success
    }
}

// ========== BENEFICIARY ACCOUNT ==========

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeneficiaryConfig {
    #[serde(default)]
    pub initial_balance: Decimal,
    #[serde(default)]
    pub closing_balance: Decimal,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeneficiaryAccount {
    pub id: Uuid,
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub config: BeneficiaryConfig,
    pub updated_at: DateTime<Utc>,
}
