//! Budget governor - admission control and threshold alerting.
//!
//! The governor answers one question before any AI call is made: would this
//! spend push a period past its limit? When `block_on_exceeded` is disabled
//! (the default) the answer is always "proceed" and budgets are
//! monitoring-only; alerts still fire either way.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::config::BudgetConfig;

use super::ledger::CostLedger;

/// Denial raised when a projected total would pass its budget.
#[derive(Debug, Clone, Error)]
#[error("{period} budget would be exceeded: projected {projected:.6} of {limit:.2} USD")]
pub struct BudgetExceeded {
    pub period: Period,
    pub projected: f64,
    pub limit: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Monthly,
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::Monthly => write!(f, "monthly"),
        }
    }
}

/// Threshold classification of a period's consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Critical,
    Exceeded,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Exceeded => "exceeded",
        }
    }
}

/// Derived, recomputed-on-read view of one period.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSnapshot {
    pub spent: f64,
    pub budget: f64,
    pub remaining: f64,
    pub percent: f64,
    pub status: Severity,
}

/// Both periods at once, the shape `checkBudgetStatus` callers consume.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodStatus {
    pub daily: BudgetSnapshot,
    pub monthly: BudgetSnapshot,
}

/// A fired threshold alert, handed to the sink.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    pub period: Period,
    pub severity: Severity,
    pub percent: f64,
    pub spent: f64,
    pub budget: f64,
    pub remaining: f64,
    pub target: Option<String>,
}

/// Alert delivery collaborator.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: &BudgetAlert);
}

/// Default sink: structured log records.
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, alert: &BudgetAlert) {
        match alert.severity {
            Severity::Exceeded => error!(
                period = %alert.period,
                severity = alert.severity.as_str(),
                percent = alert.percent,
                spent = alert.spent,
                budget = alert.budget,
                "budget alert"
            ),
            _ => warn!(
                period = %alert.period,
                severity = alert.severity.as_str(),
                percent = alert.percent,
                spent = alert.spent,
                budget = alert.budget,
                "budget alert"
            ),
        }
    }
}

/// Budget admission control plus deduplicated threshold alerting.
pub struct BudgetGovernor {
    config: BudgetConfig,
    ledger: Arc<CostLedger>,
    sink: Arc<dyn AlertSink>,
    offset: FixedOffset,
    /// (period, severity, date-bucket) guards; entries for past buckets are
    /// pruned on every check.
    fired: Mutex<HashSet<(Period, Severity, String)>>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl BudgetGovernor {
    pub fn new(
        config: BudgetConfig,
        ledger: Arc<CostLedger>,
        sink: Arc<dyn AlertSink>,
        timezone_offset_hours: i32,
    ) -> Self {
        let offset = FixedOffset::east_opt(timezone_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("UTC offset"));
        Self {
            config,
            ledger,
            sink,
            offset,
            fired: Mutex::new(HashSet::new()),
        }
    }

    fn today_bucket(&self) -> String {
        Utc::now()
            .with_timezone(&self.offset)
            .format("%Y-%m-%d")
            .to_string()
    }

    /// Spend for a period, degrading to zero on ledger failure. Generation
    /// availability wins over perfect accounting; the failure is logged.
    fn spent(&self, period: Period) -> f64 {
        let result = match period {
            Period::Daily => self.ledger.daily_cost(None),
            Period::Monthly => self.ledger.monthly_cost(None),
        };
        match result {
            Ok(total) => total,
            Err(err) => {
                error!(%period, error = %err, "ledger read failed during budget check");
                0.0
            }
        }
    }

    fn limit(&self, period: Period) -> f64 {
        match period {
            Period::Daily => self.config.daily_budget,
            Period::Monthly => self.config.monthly_budget,
        }
    }

    /// Decide whether a call with the given estimated cost may proceed.
    ///
    /// Monitoring mode (`block_on_exceeded == false`) always allows.
    pub fn can_proceed(&self, estimated_cost: f64, service: &str) -> Result<(), BudgetExceeded> {
        if !self.config.block_on_exceeded {
            return Ok(());
        }
        for period in [Period::Daily, Period::Monthly] {
            let projected = self.spent(period) + estimated_cost;
            let limit = self.limit(period);
            if projected > limit {
                warn!(
                    %period,
                    service,
                    estimated_cost,
                    projected,
                    limit,
                    "AI call denied by budget governor"
                );
                return Err(BudgetExceeded {
                    period,
                    projected,
                    limit,
                });
            }
        }
        Ok(())
    }

    fn classify(&self, percent: f64) -> Severity {
        if percent >= self.config.exceeded_threshold {
            Severity::Exceeded
        } else if percent >= self.config.critical_threshold {
            Severity::Critical
        } else if percent >= self.config.warning_threshold {
            Severity::Warning
        } else {
            Severity::Ok
        }
    }

    fn snapshot(&self, period: Period) -> BudgetSnapshot {
        let spent = self.spent(period);
        let budget = self.limit(period);
        let percent = if budget > 0.0 {
            round2(spent / budget * 100.0)
        } else {
            0.0
        };
        BudgetSnapshot {
            spent,
            budget,
            remaining: (budget - spent).max(0.0),
            percent,
            status: self.classify(percent),
        }
    }

    /// Derived status of both periods.
    pub fn status(&self) -> PeriodStatus {
        PeriodStatus {
            daily: self.snapshot(Period::Daily),
            monthly: self.snapshot(Period::Monthly),
        }
    }

    /// Evaluate thresholds and fire at most one alert per period: the
    /// highest severity currently met, deduplicated per calendar day.
    pub async fn check_and_alert(&self) {
        let bucket = self.today_bucket();
        for period in [Period::Daily, Period::Monthly] {
            let snapshot = self.snapshot(period);
            if snapshot.status == Severity::Ok {
                continue;
            }
            let should_fire = {
                let mut fired = self.fired.lock().expect("alert guard poisoned");
                fired.retain(|(_, _, b)| *b == bucket);
                fired.insert((period, snapshot.status, bucket.clone()))
            };
            if !should_fire {
                continue;
            }
            let alert = BudgetAlert {
                period,
                severity: snapshot.status,
                percent: snapshot.percent,
                spent: snapshot.spent,
                budget: snapshot.budget,
                remaining: snapshot.remaining,
                target: self.config.alert_target.clone(),
            };
            self.sink.notify(&alert).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::ledger::CostMetadata;

    struct CollectingSink(Mutex<Vec<BudgetAlert>>);

    #[async_trait]
    impl AlertSink for CollectingSink {
        async fn notify(&self, alert: &BudgetAlert) {
            self.0.lock().unwrap().push(alert.clone());
        }
    }

    fn setup(daily: f64, monthly: f64, block: bool) -> (BudgetGovernor, Arc<CollectingSink>) {
        let ledger = Arc::new(CostLedger::open(":memory:", 0).unwrap());
        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let config = BudgetConfig {
            daily_budget: daily,
            monthly_budget: monthly,
            block_on_exceeded: block,
            ..BudgetConfig::default()
        };
        let governor = BudgetGovernor::new(config, ledger, sink.clone(), 0);
        (governor, sink)
    }

    fn spend(governor: &BudgetGovernor, amount: f64) {
        governor
            .ledger
            .record("openai", "chat", amount, CostMetadata::default())
            .unwrap();
    }

    #[test]
    fn denies_when_projection_passes_daily_budget() {
        let (governor, _) = setup(50.0, 10_000.0, true);
        spend(&governor, 48.0);
        let err = governor.can_proceed(5.0, "openai").unwrap_err();
        assert_eq!(err.period, Period::Daily);
        assert!(err.projected > err.limit);
    }

    #[test]
    fn allows_within_budget_when_blocking() {
        let (governor, _) = setup(50.0, 10_000.0, true);
        spend(&governor, 40.0);
        assert!(governor.can_proceed(5.0, "openai").is_ok());
    }

    #[test]
    fn monitoring_mode_always_allows() {
        let (governor, _) = setup(50.0, 100.0, false);
        spend(&governor, 9_999.0);
        assert!(governor.can_proceed(500.0, "openai").is_ok());
    }

    #[test]
    fn status_percentages_round_and_floor() {
        let (governor, _) = setup(30.0, 1000.0, false);
        spend(&governor, 10.0);
        let status = governor.status();
        assert_eq!(status.daily.percent, 33.33);
        assert_eq!(status.daily.status, Severity::Ok);
        assert_eq!(status.daily.remaining, 20.0);
    }

    #[test]
    fn remaining_floors_at_zero() {
        let (governor, _) = setup(10.0, 1000.0, false);
        spend(&governor, 25.0);
        let status = governor.status();
        assert_eq!(status.daily.remaining, 0.0);
        assert_eq!(status.daily.status, Severity::Exceeded);
    }

    #[tokio::test]
    async fn fires_only_highest_severity_once_per_day() {
        let (governor, sink) = setup(10.0, 10_000.0, false);
        spend(&governor, 11.0); // 110% daily

        governor.check_and_alert().await;
        governor.check_and_alert().await;
        governor.check_and_alert().await;

        let alerts = sink.0.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].period, Period::Daily);
        assert_eq!(alerts[0].severity, Severity::Exceeded);
    }

    #[tokio::test]
    async fn escalation_fires_each_new_severity_once() {
        let (governor, sink) = setup(10.0, 10_000.0, false);
        spend(&governor, 8.5); // warning
        governor.check_and_alert().await;
        spend(&governor, 1.2); // critical
        governor.check_and_alert().await;
        governor.check_and_alert().await;

        let alerts = sink.0.lock().unwrap();
        let severities: Vec<Severity> = alerts.iter().map(|a| a.severity).collect();
        assert_eq!(severities, vec![Severity::Warning, Severity::Critical]);
    }

    #[tokio::test]
    async fn no_alert_below_warning() {
        let (governor, sink) = setup(100.0, 10_000.0, false);
        spend(&governor, 10.0);
        governor.check_and_alert().await;
        assert!(sink.0.lock().unwrap().is_empty());
    }
}
