//! Cost calculation
//!
//! The calculator reads the latest usage snapshot of every pod, groups pods by
//! workload, prices each group and upserts one cost row per group and day.

mod grouping;
mod r#loop;


pub use grouping::{group_pods, index_latest, WorkloadGroup};
pub use r#loop::{CalculatorConfig, CalculatorLoop, CalculatorLoopBuilder};

use crate::error::PipelineError;
use crate::models::CostCalculation;
use crate::pricing::{CostBreakdown, Rates};
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;

/// Summary of one calculator cycle
#[derive(Debug)]
pub struct CalculationReport {
    pub calculation_date: NaiveDate,
    pub computed_at: DateTime<Utc>,
    pub pods_considered: usize,
    pub pods_without_usage: usize,
    pub groups_written: usize,
    pub groups_skipped: usize,
    /// Reasons for every skipped group
    pub skipped: Vec<PipelineError>,
    pub elapsed: Duration,
    /// Error that aborted the cycle
    pub error: Option<PipelineError>,
}

impl CalculationReport {
    fn new(computed_at: DateTime<Utc>) -> Self {
        Self {
            calculation_date: computed_at.date_naive(),
            computed_at,
            pods_considered: 0,
            pods_without_usage: 0,
            groups_written: 0,
            groups_skipped: 0,
            skipped: Vec::new(),
            elapsed: Duration::ZERO,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// `partial` when some groups were skipped, `failed` when the cycle aborted
    pub fn outcome(&self) -> &'static str {
        if self.error.is_some() {
            "failed"
        } else if self.groups_skipped > 0 {
            "partial"
        } else {
            "ok"
        }
    }
}

/// Price a group with the given rates.
///
/// Fails with [`PipelineError::InvalidGroupData`] when the rates, the summed
/// resources or the node of a member pod are unusable.
pub fn price_group(
    group: &WorkloadGroup,
    rates: &Rates,
    computed_at: DateTime<Utc>,
) -> Result<CostCalculation, PipelineError> {
    let invalid = |reason: String| PipelineError::InvalidGroupData {
        namespace: group.namespace.clone(),
        deployment: group.deployment.clone(),
        reason,
    };

    rates.check().map_err(invalid)?;
    group.totals.check().map_err(invalid)?;
    if let Some(reason) = &group.invalid_node {
        return Err(invalid(reason.clone()));
    }

    let cost = CostBreakdown::compute(&group.totals, rates);
    if !(cost.daily_cost.is_finite() && cost.daily_wasted_cost.is_finite()) {
        return Err(invalid("cost overflowed".to_string()));
    }

    Ok(CostCalculation {
        namespace: group.namespace.clone(),
        deployment: group.deployment.clone(),
        hourly_cost: cost.hourly_cost,
        requested_hourly_cost: cost.requested_hourly_cost,
        daily_cost: cost.daily_cost,
        wasted_cost: cost.daily_wasted_cost,
        efficiency_score: cost.efficiency_score,
        pod_count: group.pod_count,
        calculation_date: computed_at.date_naive(),
        computed_at,
    })
}
