use axum::{
    Router,
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::core::{
    run_scenario, CancelToken, EngineError, GridPointResult, RunStatus, ScenarioConfig,
};

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationRequest {
    pub scenario: ScenarioConfig,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SimulationResponse {
    pub run_id: Option<String>,
    pub status: RunStatus,
    pub results: Vec<GridPointResult>,
    pub total_grid_points: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Rejects a scenario before any compute runs. The grid and the kernel
/// assume these ranges and never re-check them per path.
pub fn validate_scenario(cfg: &ScenarioConfig) -> Result<(), EngineError> {
    fn err(msg: impl Into<String>) -> Result<(), EngineError> {
        Err(EngineError::Validation(msg.into()))
    }

    if cfg.start_portfolios.is_empty() {
        return err("start_portfolios must not be empty");
    }
    if cfg.reserve_years_list.is_empty() {
        return err("reserve_years_list must not be empty");
    }
    if cfg.loan_amounts.is_empty() {
        return err("loan_amounts must not be empty");
    }
    if cfg
        .start_portfolios
        .iter()
        .any(|v| !v.is_finite() || *v < 0.0)
    {
        return err("start_portfolios entries must be finite and >= 0");
    }
    if cfg
        .reserve_years_list
        .iter()
        .any(|v| !v.is_finite() || *v < 0.0)
    {
        return err("reserve_years_list entries must be finite and >= 0");
    }
    if cfg.loan_amounts.iter().any(|v| *v < 0) {
        return err("loan_amounts entries must be >= 0");
    }

    if cfg.n_sims == 0 {
        return err("n_sims must be > 0");
    }
    if cfg.start_age > 99 {
        return err("start_age must be <= 99");
    }
    if cfg.ss_start_age > 120 {
        return err("ss_start_age must be between 0 and 120");
    }
    if cfg.earned_income_start_age > 120 || cfg.earned_income_end_age > 120 {
        return err("earned income ages must be between 0 and 120");
    }

    for (name, value) in [
        ("partial_year_fraction", cfg.partial_year_fraction),
        ("target_success_death_weighted", cfg.target_success_death_weighted),
        ("both_weight", cfg.both_weight),
        ("reserve_cash_fraction", cfg.reserve_cash_fraction),
        ("dd1", cfg.dd1),
        ("dd2", cfg.dd2),
        ("cut1", cfg.cut1),
        ("cut2", cfg.cut2),
        ("rm_plf_at_open", cfg.rm_plf_at_open),
        ("rm_partial_cover", cfg.rm_partial_cover),
        ("rm_repay_rate", cfg.rm_repay_rate),
        ("payoff_dd_threshold", cfg.payoff_dd_threshold),
        ("loan_bucket_use_dd", cfg.loan_bucket_use_dd),
        ("loan_bucket_partial_cover", cfg.loan_bucket_partial_cover),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return err(format!("{name} must be between 0 and 1"));
        }
    }
    if cfg.dd1 > cfg.dd2 {
        return err("dd1 must be <= dd2");
    }

    for (name, value) in [
        ("ss_annual_real", cfg.ss_annual_real),
        ("earned_income_annual_real", cfg.earned_income_annual_real),
        ("floor_annual_real", cfg.floor_annual_real),
        ("home_value_real", cfg.home_value_real),
        ("baseline_e_for_flex", cfg.baseline_e_for_flex),
        ("baseline_flex_pre", cfg.baseline_flex_pre),
        ("baseline_net_post_ss", cfg.baseline_net_post_ss),
        ("baseline_flex_post", cfg.baseline_flex_post),
        ("e_fixed", cfg.e_fixed),
        ("return_vol_real", cfg.return_vol_real),
    ] {
        if !value.is_finite() || value < 0.0 {
            return err(format!("{name} must be finite and >= 0"));
        }
    }

    for (name, value) in [
        ("return_mu_real", cfg.return_mu_real),
        ("safe_real_return", cfg.safe_real_return),
        ("rm_limit_real_growth", cfg.rm_limit_real_growth),
        ("rm_bal_real_rate", cfg.rm_bal_real_rate),
        ("loan_real_rate", cfg.loan_real_rate),
        ("loan_bucket_real_return", cfg.loan_bucket_real_return),
    ] {
        if !value.is_finite() || value <= -1.0 {
            return err(format!("{name} must be finite and > -1"));
        }
    }

    if cfg.e_lo < 0 {
        return err("e_lo must be >= 0");
    }
    if cfg.e_hi < cfg.e_lo {
        return err("e_hi must be >= e_lo");
    }
    if cfg.e_search_iters == 0 {
        return err("e_search_iters must be > 0");
    }
    if cfg.loan_amounts.iter().any(|&l| l > 0) && cfg.loan_term_years == 0 {
        return err("loan_term_years must be > 0 when a loan amount is set");
    }

    Ok(())
}

/// Validates and evaluates one request synchronously. The HTTP handler runs
/// this on a blocking thread; the `run` CLI calls it directly.
pub fn handle_request(
    request: SimulationRequest,
    cancel: &CancelToken,
) -> Result<SimulationResponse, EngineError> {
    validate_scenario(&request.scenario)?;
    let outcome = run_scenario(&request.scenario, cancel, None);
    Ok(SimulationResponse {
        run_id: request.run_id,
        status: outcome.status,
        results: outcome.results,
        total_grid_points: outcome.total_grid_points,
        error: None,
    })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router();

    let listener = TcpListener::bind(addr).await?;
    info!("drawdown engine listening on http://{addr}");

    axum::serve(listener, app).await
}

fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/simulate", post(simulate_handler))
        .fallback(not_found_handler)
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_handler(Json(request): Json<SimulationRequest>) -> Response {
    if let Err(e) = validate_scenario(&request.scenario) {
        return error_response(StatusCode::BAD_REQUEST, &e.to_string());
    }

    let run_id = request.run_id.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let cancel = CancelToken::new();
        handle_request(request, &cancel)
    })
    .await;

    match joined {
        Ok(Ok(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(Err(e)) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        Err(join_error) => {
            // A panic inside the kernel aborts the whole run, never the server.
            error!("simulation task failed: {join_error}");
            let response = SimulationResponse {
                run_id,
                status: RunStatus::Failed,
                results: Vec::new(),
                total_grid_points: 0,
                error: Some(format!("internal engine failure: {join_error}")),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
        }
    }
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}
