//! Budget module - cost tracking, budget gating and model pricing.
//!
//! # Key Concepts
//! - Pricing: static model price tables and pre-call cost estimation
//! - Ledger: durable append-only cost events plus aggregate queries
//! - Governor: gate-keeps prospective AI calls against daily/monthly limits
//! - Reporting: the outward spend/trend/projection view

mod governor;
mod ledger;
mod pricing;
mod report;

pub use governor::{
    AlertSink, BudgetAlert, BudgetExceeded, BudgetGovernor, BudgetSnapshot, LogAlertSink, Period,
    PeriodStatus, Severity,
};
pub use ledger::{CostEvent, CostLedger, CostMetadata, LedgerError};
pub use pricing::{
    estimate_cost, image_price, search_cost, select_model, ImageQuality, ImageSize, ModelChoice,
    TaskType,
};
pub use report::{CostReport, DayCost};
