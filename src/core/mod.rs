mod engine;
mod grid;
mod mortality;
mod returns;
mod solver;
mod types;

pub use engine::{amort_payment, flex_fractions, simulate_once, EnsembleSummary, FailureCounts};
pub use grid::{grid_points, run_scenario, CancelToken, ProgressEvent, ProgressHook};
pub use mortality::{death_weights, success_metrics};
pub use returns::{generate_returns, ReturnsMatrix};
pub use solver::{find_max_e, SolveOutcome};
pub use types::{
    EngineError, GridPoint, GridPointResult, Mode, PointMetrics, RunStatus, ScenarioConfig,
    SimulationOutcome, SuccessMetric, SurplusAllocation,
};
