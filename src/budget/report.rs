//! Outward cost-reporting view.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::governor::{BudgetGovernor, BudgetSnapshot};
use super::ledger::{CostLedger, LedgerError};

/// One point of the N-day trend.
#[derive(Debug, Clone, Serialize)]
pub struct DayCost {
    pub date: String,
    pub total: f64,
}

/// The full report exposed through the API: current-period status,
/// breakdowns, trend and a linear month-end projection.
#[derive(Debug, Clone, Serialize)]
pub struct CostReport {
    pub daily: BudgetSnapshot,
    pub monthly: BudgetSnapshot,
    pub can_make_requests: bool,
    pub by_service: HashMap<String, f64>,
    pub by_operation: HashMap<String, f64>,
    pub trend: Vec<DayCost>,
    pub projected_month_end: f64,
}

impl CostReport {
    /// Assemble the report for the trailing `trend_days` days.
    pub fn build(
        ledger: &Arc<CostLedger>,
        governor: &BudgetGovernor,
        trend_days: u32,
    ) -> Result<Self, LedgerError> {
        let status = governor.status();
        let can_make_requests = governor.can_proceed(0.0, "report").is_ok();
        let trend = ledger
            .daily_trend(trend_days)?
            .into_iter()
            .map(|(date, total)| DayCost { date, total })
            .collect();
        Ok(Self {
            daily: status.daily,
            monthly: status.monthly,
            can_make_requests,
            by_service: ledger.daily_by_service()?,
            by_operation: ledger.daily_by_operation()?,
            trend,
            projected_month_end: ledger.month_end_projection()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::governor::LogAlertSink;
    use crate::budget::ledger::CostMetadata;
    use crate::config::BudgetConfig;

    #[test]
    fn report_reflects_recorded_spend() {
        let ledger = Arc::new(CostLedger::open(":memory:", 0).unwrap());
        ledger
            .record("openai", "chat", 2.0, CostMetadata::default())
            .unwrap();
        ledger
            .record("dalle", "image", 0.08, CostMetadata::default())
            .unwrap();
        let governor = BudgetGovernor::new(
            BudgetConfig::default(),
            ledger.clone(),
            Arc::new(LogAlertSink),
            0,
        );

        let report = CostReport::build(&ledger, &governor, 7).unwrap();
        assert_eq!(report.daily.spent, 2.08);
        assert!(report.can_make_requests);
        assert_eq!(report.by_service["openai"], 2.0);
        assert_eq!(report.trend.len(), 7);
        assert!(report.projected_month_end >= report.monthly.spent);
    }
}
