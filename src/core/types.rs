use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Optimize,
    Single,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessMetric {
    DeathWeighted,
    #[serde(rename = "age_99")]
    Age99,
    BothMin,
    BothWeighted,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SurplusAllocation {
    ReserveFirst,
    RiskyFirst,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    Cancelled,
}

/// Full scenario configuration. Every field carries the engine's stock
/// default so partial JSON payloads evaluate a sensible baseline scenario.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScenarioConfig {
    // Ensemble controls
    pub seed: u64,
    pub n_sims: u32,
    pub start_age: u32,
    pub partial_year_fraction: f64,

    // Return model
    pub return_mu_real: f64,
    pub return_vol_real: f64,

    // Optimizer controls
    pub mode: Mode,
    pub e_fixed: f64,
    pub target_success_death_weighted: f64,
    pub e_lo: i64,
    pub e_hi: i64,
    pub e_search_iters: u32,
    pub optimize_success_metric: SuccessMetric,
    pub both_weight: f64,

    // Income
    pub ss_annual_real: f64,
    pub ss_start_age: u32,
    pub earned_income_annual_real: f64,
    pub earned_income_start_age: u32,
    pub earned_income_end_age: u32,
    pub income_applies_to_actual_spend: bool,
    pub allow_surplus_savings: bool,
    pub surplus_allocation: SurplusAllocation,

    // Spending
    pub floor_annual_real: f64,

    // Reserve
    pub reserve_cash_fraction: f64,
    pub safe_real_return: f64,

    // Guardrails
    pub dd1: f64,
    pub dd2: f64,
    pub cut1: f64,
    pub cut2: f64,
    pub baseline_e_for_flex: f64,
    pub baseline_flex_pre: f64,
    pub baseline_net_post_ss: f64,
    pub baseline_flex_post: f64,

    // Reverse mortgage
    pub rm_open_age: u32,
    pub home_value_real: f64,
    pub rm_plf_at_open: f64,
    pub rm_limit_real_growth: f64,
    pub rm_bal_real_rate: f64,
    pub rm_partial_cover: f64,
    pub rm_repay_rate: f64,
    pub payoff_dd_threshold: f64,

    // Equity loan
    pub loan_real_rate: f64,
    pub loan_term_years: u32,
    pub loan_bucket_real_return: f64,
    pub loan_bucket_use_dd: f64,
    pub loan_bucket_partial_cover: f64,

    // Sweep grid
    pub start_portfolios: Vec<f64>,
    pub reserve_years_list: Vec<f64>,
    pub loan_amounts: Vec<i64>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            seed: 424_242,
            n_sims: 25_000,
            start_age: 53,
            partial_year_fraction: 0.894444,
            return_mu_real: 0.04,
            return_vol_real: 0.10,
            mode: Mode::Optimize,
            e_fixed: 80_000.0,
            target_success_death_weighted: 0.90,
            e_lo: 40_000,
            e_hi: 220_000,
            e_search_iters: 19,
            optimize_success_metric: SuccessMetric::DeathWeighted,
            both_weight: 0.5,
            ss_annual_real: 46_405.0,
            ss_start_age: 63,
            earned_income_annual_real: 0.0,
            earned_income_start_age: 54,
            earned_income_end_age: 62,
            income_applies_to_actual_spend: true,
            allow_surplus_savings: false,
            surplus_allocation: SurplusAllocation::ReserveFirst,
            floor_annual_real: 60_000.0,
            reserve_cash_fraction: 0.5,
            safe_real_return: 0.01,
            dd1: 0.15,
            dd2: 0.25,
            cut1: 0.50,
            cut2: 1.00,
            baseline_e_for_flex: 99_300.0,
            baseline_flex_pre: 20_000.0,
            baseline_net_post_ss: 52_895.0,
            baseline_flex_post: 10_000.0,
            rm_open_age: 62,
            home_value_real: 950_000.0,
            rm_plf_at_open: 0.40,
            rm_limit_real_growth: 0.015,
            rm_bal_real_rate: 0.015,
            rm_partial_cover: 0.50,
            rm_repay_rate: 0.15,
            payoff_dd_threshold: 0.05,
            loan_real_rate: 0.03,
            loan_term_years: 30,
            loan_bucket_real_return: 0.01,
            loan_bucket_use_dd: 0.15,
            loan_bucket_partial_cover: 0.50,
            start_portfolios: vec![1_477_000.0],
            reserve_years_list: vec![1.0],
            loan_amounts: vec![0],
        }
    }
}

impl ScenarioConfig {
    /// Simulation horizon in years: ages `start_age..=99`, first year partial.
    pub fn n_years(&self) -> usize {
        (99 - self.start_age + 1) as usize
    }
}

/// One `(start_portfolio, reserve_years, loan_amount)` triple from the sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPoint {
    pub start_portfolio: f64,
    pub reserve_years: f64,
    pub loan_amount: i64,
}

/// Ensemble aggregates for a single grid point at a single spending level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointMetrics {
    pub p_success_death_weighted: f64,
    pub p_success_to_age_99: f64,
    pub median_max_dd_risky: f64,
    pub median_max_dd_total: f64,
    pub home_equity_remaining_median: f64,
    pub p_any_rm_draw: f64,
    pub rm_balance_end_median: f64,
    pub risky_end_median: f64,
    pub total_net_end_median: f64,
    pub net_worth_end_median: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GridPointResult {
    pub start_portfolio: f64,
    pub reserve_years: f64,
    pub loan_amount: i64,
    #[serde(rename = "max_E_real_per_year", skip_serializing_if = "Option::is_none")]
    pub max_e_real_per_year: Option<i64>,
    #[serde(rename = "E_real_per_year", skip_serializing_if = "Option::is_none")]
    pub e_real_per_year: Option<i64>,
    pub p_success_death_weighted: f64,
    pub p_success_to_age_99: f64,
    pub median_max_dd_risky: f64,
    pub median_max_dd_total: f64,
    pub home_equity_remaining_median: f64,
    pub p_any_rm_draw: f64,
    pub rm_balance_end_median: f64,
    pub risky_end_median: f64,
    pub total_net_end_median: f64,
    pub net_worth_end_median: f64,
}

impl GridPointResult {
    pub fn new(point: GridPoint, metrics: PointMetrics) -> Self {
        Self {
            start_portfolio: point.start_portfolio,
            reserve_years: point.reserve_years,
            loan_amount: point.loan_amount,
            max_e_real_per_year: None,
            e_real_per_year: None,
            p_success_death_weighted: metrics.p_success_death_weighted,
            p_success_to_age_99: metrics.p_success_to_age_99,
            median_max_dd_risky: metrics.median_max_dd_risky,
            median_max_dd_total: metrics.median_max_dd_total,
            home_equity_remaining_median: metrics.home_equity_remaining_median,
            p_any_rm_draw: metrics.p_any_rm_draw,
            rm_balance_end_median: metrics.rm_balance_end_median,
            risky_end_median: metrics.risky_end_median,
            total_net_end_median: metrics.total_net_end_median,
            net_worth_end_median: metrics.net_worth_end_median,
        }
    }
}

/// Batch output of a grid sweep, before the transport layer attaches a run id.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub status: RunStatus,
    pub results: Vec<GridPointResult>,
    pub total_grid_points: usize,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid scenario: {0}")]
    Validation(String),
    #[error("internal engine failure: {0}")]
    Internal(String),
}
