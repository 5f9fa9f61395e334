//! Cost allocation models

use crate::store::round_value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Policy turning summed usage into the published cost figure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostModel {
    /// Raw summed usage ratio
    #[default]
    CumulativeRatio,
    /// Share of the summed usage of all entities for the same date, in percent
    Ratio,
    /// Share of the summed usage multiplied by the billed amount for that date
    ChargeBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown cost model {0:?}, expected CUMULATIVE_RATIO, RATIO or CHARGE_BACK")]
pub struct UnknownCostModel(pub String);

impl FromStr for CostModel {
    type Err = UnknownCostModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CUMULATIVE_RATIO" => Ok(CostModel::CumulativeRatio),
            "RATIO" => Ok(CostModel::Ratio),
            "CHARGE_BACK" => Ok(CostModel::ChargeBack),
            _ => Err(UnknownCostModel(s.to_string())),
        }
    }
}

impl fmt::Display for CostModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CostModel::CumulativeRatio => "CUMULATIVE_RATIO",
            CostModel::Ratio => "RATIO",
            CostModel::ChargeBack => "CHARGE_BACK",
        };
        f.write_str(name)
    }
}

impl CostModel {
    /// Human readable name shown by the frontend
    pub fn label(&self) -> &'static str {
        match self {
            CostModel::CumulativeRatio => "Cumulative Ratio",
            CostModel::Ratio => "Normalized Ratio",
            CostModel::ChargeBack => "Charge Back",
        }
    }

    /// Unit of the published cost figures
    pub fn unit<'a>(&self, currency: &'a str) -> &'a str {
        match self {
            CostModel::ChargeBack => currency,
            _ => "%",
        }
    }

    /// Cost of one entity for one date group.
    ///
    /// `date_total` is the summed usage of all entities for the date and
    /// `billed` the billing-rate series value for the same date. Returns
    /// `None` when Charge-Back has no billed amount for the date.
    pub fn cost(&self, usage: f64, date_total: f64, billed: Option<f64>) -> Option<f64> {
        let cost = match self {
            CostModel::CumulativeRatio => usage,
            CostModel::Ratio => 100.0 * usage / date_total,
            CostModel::ChargeBack => usage / date_total * billed?,
        };
        Some(round_value(cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USAGES: [f64; 3] = [12.5, 40.0, 3.333333];

    #[test]
    fn test_parse_cost_model() {
        assert_eq!("CHARGE_BACK".parse::<CostModel>().unwrap(), CostModel::ChargeBack);
        assert_eq!("ratio".parse::<CostModel>().unwrap(), CostModel::Ratio);
        assert_eq!(
            "CUMULATIVE_RATIO".parse::<CostModel>().unwrap(),
            CostModel::CumulativeRatio
        );
        assert!("PER_CORE".parse::<CostModel>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for model in [CostModel::CumulativeRatio, CostModel::Ratio, CostModel::ChargeBack] {
            assert_eq!(model.to_string().parse::<CostModel>().unwrap(), model);
        }
    }

    #[test]
    fn test_cumulative_ratio_passes_usage_through() {
        assert_eq!(CostModel::CumulativeRatio.cost(12.3456789, 100.0, None), Some(12.345679));
    }

    #[test]
    fn test_ratio_costs_sum_to_hundred() {
        let total: f64 = USAGES.iter().sum();
        let sum: f64 = USAGES
            .iter()
            .map(|u| CostModel::Ratio.cost(*u, total, None).unwrap())
            .sum();
        assert!((sum - 100.0).abs() < 1e-5);
    }

    #[test]
    fn test_charge_back_costs_sum_to_billed_amount() {
        let total: f64 = USAGES.iter().sum();
        let billed = 24.0 * 1.75;
        let sum: f64 = USAGES
            .iter()
            .map(|u| CostModel::ChargeBack.cost(*u, total, Some(billed)).unwrap())
            .sum();
        assert!((sum - billed).abs() < 1e-5);
    }

    #[test]
    fn test_charge_back_without_billed_amount() {
        assert_eq!(CostModel::ChargeBack.cost(10.0, 20.0, None), None);
    }

    #[test]
    fn test_labels_and_units() {
        assert_eq!(CostModel::Ratio.label(), "Normalized Ratio");
        assert_eq!(CostModel::Ratio.unit("€"), "%");
        assert_eq!(CostModel::ChargeBack.unit("€"), "€");
    }
}
