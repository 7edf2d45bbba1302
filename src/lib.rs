pub mod bank_response;
pub mod bootstrap;
pub mod chargeback;
pub mod commission;
pub mod config;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod service;
pub mod settlement;

pub use error::{AppError, AppResult};
pub use service::LedgerService;
