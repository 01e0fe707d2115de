use super::mortality;
use super::returns::ReturnsMatrix;
use super::types::{GridPoint, PointMetrics, ScenarioConfig, SurplusAllocation};

const EPS: f64 = 1e-9;

/// Drawdown at which an outstanding reverse-mortgage balance is repaid from
/// the risky sleeve: the sleeve must sit at its high-water mark (within
/// floating-point epsilon of a new high).
const RM_REPAY_DD_EPS: f64 = 1e-9;

/// Why a path stopped being able to fund its plan. Tracked for diagnostics
/// only; the wire output never distinguishes causes.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FailCause {
    FloorNotFundable,
    LoanPaymentNotFundable,
    LienPayoffIncomplete,
    InfeasibleInit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FailureCounts {
    pub floor: usize,
    pub loan_payment: usize,
    pub lien_payoff: usize,
    pub infeasible_init: usize,
}

/// Aggregates plus diagnostics for one `(grid point, E)` kernel run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleSummary {
    pub metrics: PointMetrics,
    pub failures: FailureCounts,
}

/// Pre/post social security flex fractions from the baseline calibration
/// constants, both clipped to `[0, 1]`.
pub fn flex_fractions(cfg: &ScenarioConfig) -> (f64, f64) {
    let pre = if cfg.baseline_e_for_flex > 0.0 {
        cfg.baseline_flex_pre / cfg.baseline_e_for_flex
    } else {
        0.0
    };
    let post = if cfg.baseline_net_post_ss > 0.0 {
        cfg.baseline_flex_post / cfg.baseline_net_post_ss
    } else {
        0.0
    };
    (pre.clamp(0.0, 1.0), post.clamp(0.0, 1.0))
}

/// Fixed real annuity payment on `principal` over `term_years` at `rate`.
pub fn amort_payment(principal: f64, rate: f64, term_years: u32) -> f64 {
    if principal <= 0.0 || term_years == 0 {
        return 0.0;
    }
    if rate > 0.0 {
        principal * rate / (1.0 - (1.0 + rate).powi(-(term_years as i32)))
    } else {
        principal / term_years as f64
    }
}

/// Remaining principal after `k` scheduled payments, closed form.
fn loan_balance_after_k(principal: f64, rate: f64, payment: f64, k: u32) -> f64 {
    if principal <= 0.0 {
        return 0.0;
    }
    if rate.abs() < 1e-12 {
        return (principal - payment * k as f64).max(0.0);
    }
    let growth = (1.0 + rate).powi(k as i32);
    (principal * growth - payment * ((growth - 1.0) / rate)).max(0.0)
}

/// Withdraws up to `want` from `balance` and returns the unmet remainder.
/// The only primitive that mutates a balance during withdrawal.
fn take_from(balance: &mut f64, want: f64) -> f64 {
    let take = want.min(balance.max(0.0));
    *balance -= take;
    want - take
}

/// Draws `want` against a credit line, bounded by `limit - balance`, and
/// returns the unmet remainder.
fn draw_credit(balance: &mut f64, limit: f64, want: f64) -> f64 {
    let take = want.min((limit - *balance).max(0.0));
    *balance += take;
    want - take
}

fn drawdown(value: f64, hwm: f64) -> f64 {
    if hwm > 0.0 {
        1.0 - value / hwm
    } else {
        0.0
    }
}

/// Planned withdrawal for the year after next, used to size reserve targets.
/// No partial-year factor.
fn next_year_withdrawal(cfg: &ScenarioConfig, e: f64, age: u32) -> f64 {
    let ss = if age + 1 >= cfg.ss_start_age {
        cfg.ss_annual_real
    } else {
        0.0
    };
    (e - ss).max(0.0)
}

fn invest_surplus(
    mut surplus: f64,
    allocation: SurplusAllocation,
    tgt_cash: f64,
    tgt_base: f64,
    cash: &mut f64,
    base_treas: &mut f64,
    risky: &mut f64,
) {
    match allocation {
        SurplusAllocation::RiskyFirst => *risky += surplus,
        SurplusAllocation::ReserveFirst => {
            let add_cash = (tgt_cash - *cash).max(0.0).min(surplus);
            *cash += add_cash;
            surplus -= add_cash;
            let add_base = (tgt_base - *base_treas).max(0.0).min(surplus);
            *base_treas += add_base;
            surplus -= add_base;
            *risky += surplus;
        }
    }
}

/// Per-kernel-invocation constants shared by every path.
struct PathParams<'a> {
    cfg: &'a ScenarioConfig,
    e: f64,
    n_years: usize,
    f_pre: f64,
    f_post: f64,
    cash0: f64,
    treas0: f64,
    risky0: f64,
    loan_amount: f64,
    loan_payment: f64,
    reserve_years: f64,
}

fn path_params<'a>(cfg: &'a ScenarioConfig, point: GridPoint, e: f64) -> PathParams<'a> {
    let (f_pre, f_post) = flex_fractions(cfg);
    let withdrawal0 = e * cfg.partial_year_fraction;
    let reserve_total = point.reserve_years * withdrawal0;
    let cash0 = cfg.reserve_cash_fraction * reserve_total;
    let loan_amount = point.loan_amount as f64;
    PathParams {
        cfg,
        e,
        n_years: cfg.n_years(),
        f_pre,
        f_post,
        cash0,
        treas0: reserve_total - cash0,
        risky0: point.start_portfolio - reserve_total - loan_amount,
        loan_amount,
        loan_payment: amort_payment(loan_amount, cfg.loan_real_rate, cfg.loan_term_years),
        reserve_years: point.reserve_years,
    }
}

#[derive(Debug, Clone, Copy)]
struct PathOutcome {
    fail_year: usize,
    fail_cause: Option<FailCause>,
    max_dd_risky: f64,
    max_dd_total: f64,
    rm_any_draw: bool,
    cash: f64,
    base_treas: f64,
    risky: f64,
    loan_bucket: f64,
    loan_balance: f64,
    rm_balance: f64,
}

impl PathOutcome {
    fn infeasible() -> Self {
        Self {
            fail_year: 0,
            fail_cause: Some(FailCause::InfeasibleInit),
            max_dd_risky: 0.0,
            max_dd_total: 0.0,
            rm_any_draw: false,
            cash: 0.0,
            base_treas: 0.0,
            risky: 0.0,
            loan_bucket: 0.0,
            loan_balance: 0.0,
            rm_balance: 0.0,
        }
    }
}

/// Year-by-year state machine for a single path.
///
/// Within each year: planned withdrawal and income, equity-loan payment,
/// guardrail cut against the risky drawdown, hard-floor feasibility, the
/// fixed funding order, reverse-mortgage open/payoff/repayment, reserve
/// refill, then growth and high-water-mark bookkeeping. A failed path
/// freezes: later years touch neither its balances nor its metrics.
fn simulate_path(p: &PathParams<'_>, returns: &[f64]) -> PathOutcome {
    let cfg = p.cfg;
    let mut cash = p.cash0;
    let mut base_treas = p.treas0;
    let mut risky = p.risky0;
    let mut loan_bucket = p.loan_amount;
    let mut loan_balance = p.loan_amount;
    let mut rm_limit = 0.0_f64;
    let mut rm_balance = 0.0_f64;

    let mut hwm_risky = risky;
    let mut max_dd_risky = 0.0_f64;
    let mut total_net = cash + base_treas + risky + loan_bucket - loan_balance;
    let mut hwm_total = total_net;
    let mut max_dd_total = 0.0_f64;
    let mut rm_any_draw = false;
    let mut payments_made = 0u32;

    let mut fail: Option<(usize, FailCause)> = None;

    'years: for t in 0..p.n_years {
        let age = cfg.start_age + t as u32;
        let pyf = if t == 0 {
            cfg.partial_year_fraction
        } else {
            1.0
        };

        let earned = if cfg.earned_income_annual_real > 0.0
            && age >= cfg.earned_income_start_age
            && age <= cfg.earned_income_end_age
        {
            cfg.earned_income_annual_real * pyf
        } else {
            0.0
        };
        let ss = if age >= cfg.ss_start_age {
            cfg.ss_annual_real * pyf
        } else {
            0.0
        };

        // Planned withdrawal for the year. In actual-spend income mode the
        // plan stays at E and income offsets the funded amount below; in
        // legacy mode income nets against the plan directly.
        let (planned, income) = if cfg.income_applies_to_actual_spend {
            ((p.e * pyf).max(0.0), ss + earned)
        } else {
            ((p.e * pyf - ss - earned).max(0.0), 0.0)
        };

        // Equity-loan payment comes out ahead of all other spending while
        // the lien predates the reverse-mortgage open.
        if age < cfg.rm_open_age && loan_balance > 0.0 && payments_made < cfg.loan_term_years {
            let dd_entry = drawdown(risky, hwm_risky);
            let mut rem = p.loan_payment;
            rem = take_from(&mut cash, rem);
            rem = take_from(&mut base_treas, rem);
            rem = take_from(&mut risky, rem);
            if rem > EPS && dd_entry >= cfg.loan_bucket_use_dd {
                rem = take_from(&mut loan_bucket, rem);
            }
            if rem > EPS {
                fail = Some((t, FailCause::LoanPaymentNotFundable));
                break 'years;
            }
            payments_made += 1;
            loan_balance = if payments_made < cfg.loan_term_years {
                loan_balance_after_k(p.loan_amount, cfg.loan_real_rate, p.loan_payment, payments_made)
            } else {
                0.0
            };
        }

        // Guardrail drawdown for the year.
        let dd = drawdown(risky, hwm_risky);

        let flex_frac = if age < cfg.ss_start_age {
            p.f_pre
        } else {
            p.f_post
        };
        let flex_amt = (flex_frac * planned).min(planned);
        let floor_amt = planned - flex_amt;
        let cut = if dd >= cfg.dd2 {
            cfg.cut2
        } else if dd >= cfg.dd1 {
            cfg.cut1
        } else {
            0.0
        };
        let desired = floor_amt + flex_amt * (1.0 - cut);

        // The absolute floor overrides any guardrail cut.
        let floor_need = cfg.floor_annual_real * pyf;

        let (asset_desired, floor_need_assets) = if income > 0.0 {
            let surplus = (income - desired).max(0.0);
            if surplus > 0.0 {
                let nxt = next_year_withdrawal(cfg, p.e, age);
                let tgt_total = p.reserve_years * nxt;
                let tgt_cash = cfg.reserve_cash_fraction * tgt_total;
                invest_surplus(
                    surplus,
                    cfg.surplus_allocation,
                    tgt_cash,
                    tgt_total - tgt_cash,
                    &mut cash,
                    &mut base_treas,
                    &mut risky,
                );
            }
            ((desired - income).max(0.0), (floor_need - income).max(0.0))
        } else {
            (desired, floor_need)
        };

        // Legacy income mode: any income beyond the plan is saved back into
        // assets only when the scenario opts in.
        if !cfg.income_applies_to_actual_spend && cfg.allow_surplus_savings {
            let residual = (ss + earned - p.e * pyf).max(0.0);
            if residual > 0.0 {
                let nxt = next_year_withdrawal(cfg, p.e, age);
                let tgt_total = p.reserve_years * nxt;
                let tgt_cash = cfg.reserve_cash_fraction * tgt_total;
                invest_surplus(
                    residual,
                    cfg.surplus_allocation,
                    tgt_cash,
                    tgt_total - tgt_cash,
                    &mut cash,
                    &mut base_treas,
                    &mut risky,
                );
            }
        }

        // Hard-floor feasibility across every reachable source.
        let avail_rm = (rm_limit - rm_balance).max(0.0);
        let max_feasible = cash + base_treas + risky.max(0.0) + avail_rm + loan_bucket;
        if max_feasible < floor_need_assets - EPS {
            fail = Some((t, FailCause::FloorNotFundable));
            break 'years;
        }
        let spend_assets = asset_desired.min(max_feasible).max(floor_need_assets);

        // Funding order. The partial-cover caps anchor on the shortfall at
        // entry to their step, not the original desired spend.
        let mut rem = spend_assets;
        rem = take_from(&mut cash, rem);
        rem = take_from(&mut base_treas, rem);
        if rem > EPS && dd >= cfg.loan_bucket_use_dd {
            let take = (cfg.loan_bucket_partial_cover * rem).min(loan_bucket.max(0.0));
            loan_bucket -= take;
            rem -= take;
        }
        if rem > EPS && age >= cfg.rm_open_age && dd >= cfg.dd2 {
            let want = cfg.rm_partial_cover * rem;
            let unmet = draw_credit(&mut rm_balance, rm_limit, want);
            rem -= want - unmet;
        }
        rem = take_from(&mut risky, rem);
        rem = draw_credit(&mut rm_balance, rm_limit, rem);
        let _ = take_from(&mut loan_bucket, rem);

        // Reverse-mortgage open: establish the line and clear any equity
        // loan lien against it immediately.
        if age == cfg.rm_open_age {
            rm_limit = cfg.home_value_real * cfg.rm_plf_at_open;
            if loan_balance > 0.0 {
                let mut payoff = loan_balance;
                if drawdown(risky, hwm_risky) <= cfg.payoff_dd_threshold {
                    payoff = take_from(&mut risky, payoff);
                    payoff = draw_credit(&mut rm_balance, rm_limit, payoff);
                } else {
                    payoff = draw_credit(&mut rm_balance, rm_limit, payoff);
                    payoff = take_from(&mut risky, payoff);
                }
                payoff = take_from(&mut base_treas, payoff);
                payoff = take_from(&mut cash, payoff);
                payoff = take_from(&mut loan_bucket, payoff);
                loan_balance = 0.0;
                if payoff > EPS {
                    fail = Some((t, FailCause::LienPayoffIncomplete));
                    break 'years;
                }
            }
        }

        // Repay reverse-mortgage debt when the risky sleeve sits at a high.
        if dd <= RM_REPAY_DD_EPS && rm_balance > 0.0 {
            let repay = (cfg.rm_repay_rate * rm_balance).min(risky.max(0.0));
            risky -= repay;
            rm_balance -= repay;
        }

        // Refill reserves toward target in calm years.
        if dd < cfg.dd1 {
            let nxt = next_year_withdrawal(cfg, p.e, age);
            let tgt_total = p.reserve_years * nxt;
            let tgt_cash = cfg.reserve_cash_fraction * tgt_total;
            let tgt_base = tgt_total - tgt_cash;
            let add_cash = (tgt_cash - cash).max(0.0).min(risky.max(0.0));
            risky -= add_cash;
            cash += add_cash;
            let add_base = (tgt_base - base_treas).max(0.0).min(risky.max(0.0));
            risky -= add_base;
            base_treas += add_base;
        }

        // Growth.
        risky *= 1.0 + returns[t];
        cash *= 1.0 + cfg.safe_real_return;
        base_treas *= 1.0 + cfg.safe_real_return;
        loan_bucket *= 1.0 + cfg.loan_bucket_real_return;
        if age >= cfg.rm_open_age {
            rm_limit *= 1.0 + cfg.rm_limit_real_growth;
            rm_balance *= 1.0 + cfg.rm_bal_real_rate;
        }

        // High-water marks and drawdown records.
        hwm_risky = hwm_risky.max(risky);
        max_dd_risky = max_dd_risky.max(drawdown(risky, hwm_risky));
        total_net = cash + base_treas + risky + loan_bucket - loan_balance;
        hwm_total = hwm_total.max(total_net);
        max_dd_total = max_dd_total.max(drawdown(total_net, hwm_total));

        rm_any_draw = rm_any_draw || rm_balance > 0.0;
    }

    let (fail_year, fail_cause) = match fail {
        Some((t, cause)) => (t, Some(cause)),
        None => (p.n_years, None),
    };

    PathOutcome {
        fail_year,
        fail_cause,
        max_dd_risky,
        max_dd_total,
        rm_any_draw: rm_any_draw || rm_balance > 0.0,
        cash,
        base_treas,
        risky,
        loan_bucket,
        loan_balance,
        rm_balance,
    }
}

/// Runs the full ensemble for one grid point at spending level `e` and
/// reduces it to per-point aggregates.
pub fn simulate_once(
    cfg: &ScenarioConfig,
    point: GridPoint,
    e: f64,
    returns: &ReturnsMatrix,
) -> EnsembleSummary {
    let p = path_params(cfg, point, e);
    let n_sims = returns.n_sims();

    let outcomes: Vec<PathOutcome> = if p.risky0 < 0.0 {
        // The reserve carve-out plus loan exceeds the starting portfolio:
        // nothing to invest, every path fails at initialization.
        vec![PathOutcome::infeasible(); n_sims]
    } else {
        (0..n_sims)
            .map(|path| simulate_path(&p, returns.path(path)))
            .collect()
    };

    aggregate(cfg, p.n_years, &outcomes)
}

fn aggregate(cfg: &ScenarioConfig, n_years: usize, outcomes: &[PathOutcome]) -> EnsembleSummary {
    let n = outcomes.len();
    let fail_year: Vec<usize> = outcomes.iter().map(|o| o.fail_year).collect();
    let (p_dw, p99) = mortality::success_metrics(&fail_year, cfg.start_age, n_years);

    let mut dd_risky = Vec::with_capacity(n);
    let mut dd_total = Vec::with_capacity(n);
    let mut home_equity = Vec::with_capacity(n);
    let mut rm_end = Vec::with_capacity(n);
    let mut risky_end = Vec::with_capacity(n);
    let mut total_net_end = Vec::with_capacity(n);
    let mut net_worth_end = Vec::with_capacity(n);
    let mut any_rm = 0usize;
    let mut failures = FailureCounts::default();

    for o in outcomes {
        let equity = (cfg.home_value_real - o.rm_balance).max(0.0);
        let total_net = o.cash + o.base_treas + o.risky + o.loan_bucket - o.loan_balance;
        dd_risky.push(o.max_dd_risky);
        dd_total.push(o.max_dd_total);
        home_equity.push(equity);
        rm_end.push(o.rm_balance);
        risky_end.push(o.risky);
        total_net_end.push(total_net);
        net_worth_end.push(total_net + equity);
        if o.rm_any_draw {
            any_rm += 1;
        }
        match o.fail_cause {
            Some(FailCause::FloorNotFundable) => failures.floor += 1,
            Some(FailCause::LoanPaymentNotFundable) => failures.loan_payment += 1,
            Some(FailCause::LienPayoffIncomplete) => failures.lien_payoff += 1,
            Some(FailCause::InfeasibleInit) => failures.infeasible_init += 1,
            None => {}
        }
    }

    let metrics = PointMetrics {
        p_success_death_weighted: p_dw,
        p_success_to_age_99: p99,
        median_max_dd_risky: percentile(&mut dd_risky, 50.0),
        median_max_dd_total: percentile(&mut dd_total, 50.0),
        home_equity_remaining_median: percentile(&mut home_equity, 50.0),
        p_any_rm_draw: if n > 0 { any_rm as f64 / n as f64 } else { 0.0 },
        rm_balance_end_median: percentile(&mut rm_end, 50.0),
        risky_end_median: percentile(&mut risky_end, 50.0),
        total_net_end_median: percentile(&mut total_net_end, 50.0),
        net_worth_end_median: percentile(&mut net_worth_end, 50.0),
    };

    EnsembleSummary { metrics, failures }
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
