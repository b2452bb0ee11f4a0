//! Pricing configuration and the cost model
//!
//! The model is deliberately simple and deterministic: hourly cost is a
//! linear function of CPU cores and memory GB, waste is the part of the
//! requested cost that is not used, and efficiency is used/requested capped
//! at 100.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default price of one CPU core for one hour
pub const DEFAULT_CPU_HOURLY_RATE: f64 = 0.031;

/// Default price of one GB of memory for one hour
pub const DEFAULT_MEMORY_GB_HOURLY_RATE: f64 = 0.004;

/// Hours in one calculation day
pub const HOURS_PER_DAY: f64 = 24.0;

/// Upper bound for the efficiency score
pub const MAX_EFFICIENCY: f64 = 100.0;

/// Per-resource hourly prices
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    pub cpu_hourly_rate: f64,
    pub memory_gb_hourly_rate: f64,
}

impl Default for Rates {
    fn default() -> Self {
        Self {
            cpu_hourly_rate: DEFAULT_CPU_HOURLY_RATE,
            memory_gb_hourly_rate: DEFAULT_MEMORY_GB_HOURLY_RATE,
        }
    }
}

impl Rates {
    /// Check that both rates are usable; returns the reason if not
    pub fn check(&self) -> Result<(), String> {
        check_amount("cpu hourly rate", self.cpu_hourly_rate)?;
        check_amount("memory GB hourly rate", self.memory_gb_hourly_rate)
    }

    /// Hourly price of the given resources
    pub fn hourly_cost(&self, cpu_cores: f64, memory_gb: f64) -> f64 {
        cpu_cores * self.cpu_hourly_rate + memory_gb * self.memory_gb_hourly_rate
    }
}

/// Pricing configuration, static for the process lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Cluster-wide rates
    pub rates: Rates,
    /// Rates that replace the cluster-wide ones for a namespace
    #[serde(default)]
    pub namespace_rates: HashMap<String, Rates>,
    /// Node hourly rate keyed by node type
    #[serde(default)]
    pub node_hourly_rates: HashMap<String, f64>,
    /// Node hourly rate for node types missing from the table
    #[serde(default)]
    pub default_node_hourly_rate: f64,
}

impl PricingConfig {
    pub fn new(rates: Rates) -> Self {
        Self {
            rates,
            ..Default::default()
        }
    }

    /// Rates that apply to the given namespace
    pub fn rates_for(&self, namespace: &str) -> Rates {
        self.namespace_rates
            .get(namespace)
            .copied()
            .unwrap_or(self.rates)
    }

    /// Hourly rate of a node of the given type
    pub fn node_hourly_rate(&self, node_type: &str) -> f64 {
        self.node_hourly_rates
            .get(node_type)
            .copied()
            .unwrap_or(self.default_node_hourly_rate)
    }

    /// Validate the cluster-wide rates and the node price table.
    /// Namespace overrides are checked per group at calculation time.
    pub fn validate(&self) -> Result<(), String> {
        self.rates.check()?;
        check_amount("default node hourly rate", self.default_node_hourly_rate)?;
        for (node_type, rate) in &self.node_hourly_rates {
            check_amount(&format!("node hourly rate for {node_type}"), *rate)?;
        }
        Ok(())
    }
}

/// Summed resources of a workload group
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceTotals {
    pub requested_cpu_cores: f64,
    pub requested_memory_gb: f64,
    pub actual_cpu_cores: f64,
    pub actual_memory_gb: f64,
}

impl ResourceTotals {
    pub fn check(&self) -> Result<(), String> {
        check_amount("requested cpu", self.requested_cpu_cores)?;
        check_amount("requested memory", self.requested_memory_gb)?;
        check_amount("actual cpu", self.actual_cpu_cores)?;
        check_amount("actual memory", self.actual_memory_gb)
    }
}

/// Cost figures of a workload group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostBreakdown {
    pub hourly_cost: f64,
    pub requested_hourly_cost: f64,
    /// Hourly waste, never negative
    pub wasted_hourly_cost: f64,
    pub daily_cost: f64,
    pub daily_wasted_cost: f64,
    /// Used share of the requested cost in percent, within [0, 100]
    pub efficiency_score: f64,
}

impl CostBreakdown {
    pub fn compute(totals: &ResourceTotals, rates: &Rates) -> Self {
        let hourly_cost = rates.hourly_cost(totals.actual_cpu_cores, totals.actual_memory_gb);
        let requested_hourly_cost =
            rates.hourly_cost(totals.requested_cpu_cores, totals.requested_memory_gb);
        let wasted_hourly_cost = (requested_hourly_cost - hourly_cost).max(0.0);

        let efficiency_score = if requested_hourly_cost == 0.0 {
            0.0
        } else {
            // Over-committed groups clamp to 100
            (hourly_cost / requested_hourly_cost * 100.0).min(MAX_EFFICIENCY)
        };

        Self {
            hourly_cost,
            requested_hourly_cost,
            wasted_hourly_cost,
            daily_cost: hourly_cost * HOURS_PER_DAY,
            daily_wasted_cost: wasted_hourly_cost * HOURS_PER_DAY,
            efficiency_score,
        }
    }
}

fn check_amount(what: &str, value: f64) -> Result<(), String> {
    if !value.is_finite() {
        Err(format!("{what} is not a finite number"))
    } else if value < 0.0 {
        Err(format!("{what} is negative ({value})"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_reference_scenario() {
        let totals = ResourceTotals {
            requested_cpu_cores: 1.0,
            requested_memory_gb: 2.0,
            actual_cpu_cores: 0.5,
            actual_memory_gb: 1.0,
        };
        let cost = CostBreakdown::compute(&totals, &Rates::default());

        assert!(approx(cost.hourly_cost, 0.0195));
        assert!(approx(cost.requested_hourly_cost, 0.039));
        assert!(approx(cost.wasted_hourly_cost, 0.0195));
        assert!(approx(cost.efficiency_score, 50.0));
        assert!(approx(cost.daily_cost, 0.468));
        assert!(approx(cost.daily_wasted_cost, 0.468));
    }

    #[test]
    fn test_no_usage_is_full_waste() {
        let totals = ResourceTotals {
            requested_cpu_cores: 1.0,
            requested_memory_gb: 2.0,
            ..Default::default()
        };
        let cost = CostBreakdown::compute(&totals, &Rates::default());

        assert_eq!(cost.hourly_cost, 0.0);
        assert!(approx(cost.wasted_hourly_cost, cost.requested_hourly_cost));
        assert_eq!(cost.efficiency_score, 0.0);
    }

    #[test]
    fn test_overcommit_clamps_efficiency_and_waste() {
        let totals = ResourceTotals {
            requested_cpu_cores: 0.5,
            requested_memory_gb: 1.0,
            actual_cpu_cores: 2.0,
            actual_memory_gb: 4.0,
        };
        let cost = CostBreakdown::compute(&totals, &Rates::default());

        assert_eq!(cost.efficiency_score, MAX_EFFICIENCY);
        assert_eq!(cost.wasted_hourly_cost, 0.0);
        assert_eq!(cost.daily_wasted_cost, 0.0);
    }

    #[test]
    fn test_zero_requests_score_zero() {
        let totals = ResourceTotals {
            actual_cpu_cores: 1.0,
            ..Default::default()
        };
        let cost = CostBreakdown::compute(&totals, &Rates::default());

        assert_eq!(cost.efficiency_score, 0.0);
        assert_eq!(cost.wasted_hourly_cost, 0.0);
    }

    #[test]
    fn test_efficiency_and_waste_bounds_over_grid() {
        let samples = [0.0, 0.001, 0.25, 1.0, 3.5, 64.0];
        let rates = Rates::default();

        for &req_cpu in &samples {
            for &req_mem in &samples {
                for &act_cpu in &samples {
                    for &act_mem in &samples {
                        let cost = CostBreakdown::compute(
                            &ResourceTotals {
                                requested_cpu_cores: req_cpu,
                                requested_memory_gb: req_mem,
                                actual_cpu_cores: act_cpu,
                                actual_memory_gb: act_mem,
                            },
                            &rates,
                        );
                        assert!((0.0..=100.0).contains(&cost.efficiency_score));
                        assert!(cost.wasted_hourly_cost >= 0.0);
                        assert!(cost.daily_wasted_cost >= 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_namespace_override_and_node_table() {
        let mut pricing = PricingConfig::new(Rates::default());
        pricing.namespace_rates.insert(
            "batch".to_string(),
            Rates {
                cpu_hourly_rate: 0.01,
                memory_gb_hourly_rate: 0.001,
            },
        );
        pricing
            .node_hourly_rates
            .insert("m5.xlarge".to_string(), 0.192);
        pricing.default_node_hourly_rate = 0.1;

        assert_eq!(pricing.rates_for("batch").cpu_hourly_rate, 0.01);
        assert_eq!(pricing.rates_for("prod"), Rates::default());
        assert_eq!(pricing.node_hourly_rate("m5.xlarge"), 0.192);
        assert_eq!(pricing.node_hourly_rate("unknown"), 0.1);
        assert!(pricing.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_rates() {
        let pricing = PricingConfig::new(Rates {
            cpu_hourly_rate: -0.1,
            memory_gb_hourly_rate: 0.004,
        });
        assert!(pricing.validate().unwrap_err().contains("negative"));

        let pricing = PricingConfig::new(Rates {
            cpu_hourly_rate: 0.031,
            memory_gb_hourly_rate: f64::NAN,
        });
        assert!(pricing.validate().unwrap_err().contains("finite"));

        let mut pricing = PricingConfig::default();
        pricing.node_hourly_rates.insert("big".to_string(), -1.0);
        assert!(pricing.validate().is_err());
    }
}
