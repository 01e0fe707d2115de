use tracing::warn;

use super::engine::{simulate_once, EnsembleSummary};
use super::grid::CancelToken;
use super::returns::ReturnsMatrix;
use super::types::{GridPoint, PointMetrics, ScenarioConfig, SuccessMetric};

/// Cap on upper-bound auto-expansion rounds; each round doubles the search
/// span above `e_lo`.
const MAX_BOUND_EXPANSIONS: u32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct SolveOutcome {
    pub max_e: i64,
    pub summary: EnsembleSummary,
    /// False when the search ran out of room: either the lower bound already
    /// misses the target, or the expanded upper bound still meets it. The
    /// reported `max_e` is then best-effort.
    pub converged: bool,
}

fn objective(metric: SuccessMetric, both_weight: f64, m: &PointMetrics) -> f64 {
    let p_dw = m.p_success_death_weighted;
    let p99 = m.p_success_to_age_99;
    match metric {
        SuccessMetric::DeathWeighted => p_dw,
        SuccessMetric::Age99 => p99,
        SuccessMetric::BothMin => p_dw.min(p99),
        SuccessMetric::BothWeighted => both_weight * p_dw + (1.0 - both_weight) * p99,
    }
}

/// Integer binary search for the largest `E` whose success objective still
/// meets the target. The returns matrix is shared across probes, so the
/// objective is a deterministic, weakly decreasing function of `E` and never
/// re-seeds between probes.
///
/// Returns `None` only when cancelled at a probe boundary.
pub fn find_max_e(
    cfg: &ScenarioConfig,
    point: GridPoint,
    returns: &ReturnsMatrix,
    cancel: &CancelToken,
) -> Option<SolveOutcome> {
    let target = cfg.target_success_death_weighted;
    let metric = cfg.optimize_success_metric;
    let probe = |e: i64| -> Option<EnsembleSummary> {
        if cancel.is_cancelled() {
            return None;
        }
        Some(simulate_once(cfg, point, e as f64, returns))
    };

    let mut lo = cfg.e_lo;
    let mut hi = cfg.e_hi;

    let mut best = probe(lo)?;
    if objective(metric, cfg.both_weight, &best.metrics) < target {
        // Even the floor of the search range misses the target; the lower
        // endpoint is the closest achievable answer.
        warn!(
            e_lo = lo,
            target,
            objective = objective(metric, cfg.both_weight, &best.metrics),
            "search range infeasible at its lower bound; returning best effort"
        );
        return Some(SolveOutcome {
            max_e: lo,
            summary: best,
            converged: false,
        });
    }

    let mut hi_summary = probe(hi)?;
    let mut span = (cfg.e_hi - cfg.e_lo).max(1);
    let mut expansions = 0;
    while objective(metric, cfg.both_weight, &hi_summary.metrics) >= target
        && expansions < MAX_BOUND_EXPANSIONS
    {
        lo = hi;
        best = hi_summary;
        span *= 2;
        hi = cfg.e_lo + span;
        hi_summary = probe(hi)?;
        expansions += 1;
    }

    if objective(metric, cfg.both_weight, &hi_summary.metrics) >= target {
        warn!(
            e_hi = hi,
            expansions,
            "upper bound still meets the target after expansion; returning best effort"
        );
        return Some(SolveOutcome {
            max_e: hi,
            summary: hi_summary,
            converged: false,
        });
    }

    for _ in 0..cfg.e_search_iters {
        if lo >= hi {
            break;
        }
        // Upper midpoint: a two-point bracket still makes progress, so the
        // search closes to `obj(lo) >= target > obj(lo + 1)`.
        let mid = lo + (hi - lo + 1) / 2;
        let mid_summary = probe(mid)?;
        if objective(metric, cfg.both_weight, &mid_summary.metrics) >= target {
            lo = mid;
            best = mid_summary;
        } else {
            hi = mid - 1;
        }
    }

    Some(SolveOutcome {
        max_e: lo,
        summary: best,
        converged: true,
    })
}
