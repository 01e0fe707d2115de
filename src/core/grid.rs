use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, info, warn};

use super::engine::{simulate_once, FailureCounts};
use super::returns::{generate_returns, ReturnsMatrix};
use super::solver::find_max_e;
use super::types::{
    GridPoint, GridPointResult, Mode, RunStatus, ScenarioConfig, SimulationOutcome,
};

/// Cooperative cancellation flag, checked at grid-point and optimizer-probe
/// boundaries. Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProgressEvent {
    pub completed: usize,
    pub total: usize,
    pub point: GridPoint,
}

pub type ProgressHook = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// The sweep in Cartesian order: `start_portfolios` outermost, then
/// `reserve_years_list`, then `loan_amounts`.
pub fn grid_points(cfg: &ScenarioConfig) -> Vec<GridPoint> {
    let mut points = Vec::with_capacity(
        cfg.start_portfolios.len() * cfg.reserve_years_list.len() * cfg.loan_amounts.len(),
    );
    for &start_portfolio in &cfg.start_portfolios {
        for &reserve_years in &cfg.reserve_years_list {
            for &loan_amount in &cfg.loan_amounts {
                points.push(GridPoint {
                    start_portfolio,
                    reserve_years,
                    loan_amount,
                });
            }
        }
    }
    points
}

/// Evaluates the whole sweep for one scenario. Grid points run on the rayon
/// pool; output order is Cartesian regardless of execution order. A
/// cancelled run returns whatever completed, with a cancelled status.
pub fn run_scenario(
    cfg: &ScenarioConfig,
    cancel: &CancelToken,
    progress: Option<&ProgressHook>,
) -> SimulationOutcome {
    let n_years = cfg.n_years();
    let returns = generate_returns(
        cfg.seed,
        cfg.n_sims as usize,
        n_years,
        cfg.return_mu_real,
        cfg.return_vol_real,
    );
    let points = grid_points(cfg);
    let total = points.len();
    info!(
        grid_points = total,
        n_sims = cfg.n_sims,
        n_years,
        mode = ?cfg.mode,
        "starting grid sweep"
    );

    let completed = AtomicUsize::new(0);
    let rows: Vec<Option<GridPointResult>> = points
        .into_par_iter()
        .map(|point| {
            if cancel.is_cancelled() {
                return None;
            }
            let row = evaluate_point(cfg, point, &returns, cancel)?;
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(hook) = progress {
                let event = ProgressEvent {
                    completed: done,
                    total,
                    point,
                };
                if catch_unwind(AssertUnwindSafe(|| hook(event))).is_err() {
                    warn!("progress callback panicked; continuing");
                }
            }
            Some(row)
        })
        .collect();

    let was_cancelled = rows.iter().any(|r| r.is_none());
    let results: Vec<GridPointResult> = rows.into_iter().flatten().collect();
    let status = if was_cancelled {
        RunStatus::Cancelled
    } else {
        RunStatus::Completed
    };
    info!(completed = results.len(), ?status, "grid sweep finished");

    SimulationOutcome {
        status,
        total_grid_points: results.len(),
        results,
    }
}

fn evaluate_point(
    cfg: &ScenarioConfig,
    point: GridPoint,
    returns: &ReturnsMatrix,
    cancel: &CancelToken,
) -> Option<GridPointResult> {
    match cfg.mode {
        Mode::Single => {
            if cancel.is_cancelled() {
                return None;
            }
            let e = cfg.e_fixed as i64;
            let summary = simulate_once(cfg, point, e as f64, returns);
            log_failures(point, &summary.failures);
            let mut row = GridPointResult::new(point, summary.metrics);
            row.e_real_per_year = Some(e);
            Some(row)
        }
        Mode::Optimize => {
            let outcome = find_max_e(cfg, point, returns, cancel)?;
            log_failures(point, &outcome.summary.failures);
            let mut row = GridPointResult::new(point, outcome.summary.metrics);
            row.max_e_real_per_year = Some(outcome.max_e);
            Some(row)
        }
    }
}

fn log_failures(point: GridPoint, failures: &FailureCounts) {
    let total =
        failures.floor + failures.loan_payment + failures.lien_payoff + failures.infeasible_init;
    if total > 0 {
        debug!(
            start_portfolio = point.start_portfolio,
            reserve_years = point.reserve_years,
            loan_amount = point.loan_amount,
            floor = failures.floor,
            loan_payment = failures.loan_payment,
            lien_payoff = failures.lien_payoff,
            infeasible_init = failures.infeasible_init,
            "path failures at grid point"
        );
    }
}
