//! SSA male life table (2022) and the death-weighted success combinator.

/// SSA male life table (2022), ages 53-99: `(age, qx, lx)`, conditional on
/// being alive at 53.
const SSA_ROWS: [(u32, f64, f64); 47] = [
    (53, 0.007073, 88825.0),
    (54, 0.007675, 88196.0),
    (55, 0.008348, 87520.0),
    (56, 0.009051, 86789.0),
    (57, 0.009822, 86003.0),
    (58, 0.010669, 85159.0),
    (59, 0.011548, 84250.0),
    (60, 0.012458, 83277.0),
    (61, 0.013403, 82240.0),
    (62, 0.014450, 81138.0),
    (63, 0.015571, 79965.0),
    (64, 0.016737, 78720.0),
    (65, 0.017897, 77402.0),
    (66, 0.019017, 76017.0),
    (67, 0.020213, 74572.0),
    (68, 0.021569, 73064.0),
    (69, 0.023088, 71488.0),
    (70, 0.024828, 69838.0),
    (71, 0.026705, 68104.0),
    (72, 0.028761, 66285.0),
    (73, 0.031116, 64379.0),
    (74, 0.033861, 62376.0),
    (75, 0.037088, 60263.0),
    (76, 0.041126, 58028.0),
    (77, 0.045241, 55642.0),
    (78, 0.049793, 53125.0),
    (79, 0.054768, 50479.0),
    (80, 0.060660, 47715.0),
    (81, 0.067027, 44820.0),
    (82, 0.073999, 41816.0),
    (83, 0.081737, 38722.0),
    (84, 0.090458, 35557.0),
    (85, 0.100525, 32340.0),
    (86, 0.111793, 29089.0),
    (87, 0.124494, 25837.0),
    (88, 0.138398, 22621.0),
    (89, 0.153207, 19490.0),
    (90, 0.169704, 16504.0),
    (91, 0.187963, 13703.0),
    (92, 0.208395, 11128.0),
    (93, 0.230808, 8809.0),
    (94, 0.253914, 6776.0),
    (95, 0.277402, 5055.0),
    (96, 0.300882, 3653.0),
    (97, 0.324326, 2554.0),
    (98, 0.347332, 1726.0),
    (99, 0.369430, 1126.0),
];

/// Death-age distribution from the life table: `(ages, p_death)` where
/// `p_death[i]` is the probability of dying at `ages[i]`, normalized over
/// the table's age range.
pub fn death_weights() -> (Vec<u32>, Vec<f64>) {
    let l0 = SSA_ROWS[0].2;
    let mut ages = Vec::with_capacity(SSA_ROWS.len());
    let mut p = Vec::with_capacity(SSA_ROWS.len());
    for &(age, qx, lx) in &SSA_ROWS {
        ages.push(age);
        p.push(lx * qx / l0);
    }
    let total: f64 = p.iter().sum();
    for w in &mut p {
        *w /= total;
    }
    (ages, p)
}

/// Reduces per-path failure years to `(death_weighted, to_age_99)` success
/// probabilities.
///
/// `fail_year[i] == n_years` means path `i` never failed within the horizon.
/// The model covers ages `start_age..start_age + n_years`; table ages outside
/// that range use the final model year's ruin fraction.
pub fn success_metrics(fail_year: &[usize], start_age: u32, n_years: usize) -> (f64, f64) {
    let n_paths = fail_year.len();
    if n_paths == 0 || n_years == 0 {
        return (0.0, 0.0);
    }

    let mut ruin_by_t = vec![0.0; n_years];
    for t in 0..n_years {
        let failed = fail_year.iter().filter(|&&f| f <= t).count();
        ruin_by_t[t] = failed as f64 / n_paths as f64;
    }

    let end_age = start_age + n_years as u32 - 1;
    let (ages, p_death) = death_weights();
    let mut p_dw = 0.0;
    for (age, p) in ages.iter().zip(p_death.iter()) {
        let t = if (start_age..=end_age).contains(age) {
            (age - start_age) as usize
        } else {
            n_years - 1
        };
        p_dw += p * (1.0 - ruin_by_t[t]);
    }

    let survived = fail_year.iter().filter(|&&f| f >= n_years).count();
    let p99 = survived as f64 / n_paths as f64;
    (p_dw, p99)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn death_weights_sum_to_one() {
        let (ages, p) = death_weights();
        assert_eq!(ages.len(), 47);
        assert_eq!(ages[0], 53);
        assert_eq!(ages[46], 99);
        let total: f64 = p.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(p.iter().all(|&w| w > 0.0));
    }

    #[test]
    fn no_failures_is_full_success() {
        let fail_year = vec![47; 100];
        let (p_dw, p99) = success_metrics(&fail_year, 53, 47);
        assert!((p_dw - 1.0).abs() < 1e-12);
        assert!((p99 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn immediate_failure_is_zero_success() {
        let fail_year = vec![0; 100];
        let (p_dw, p99) = success_metrics(&fail_year, 53, 47);
        assert!(p_dw.abs() < 1e-12);
        assert!(p99.abs() < 1e-12);
    }

    #[test]
    fn late_failure_scores_between_metrics() {
        // Failing in the last model year still funds every earlier death age,
        // so the death-weighted metric stays high while age-99 drops to zero.
        let fail_year = vec![46; 100];
        let (p_dw, p99) = success_metrics(&fail_year, 53, 47);
        assert!(p99.abs() < 1e-12);
        assert!(p_dw > 0.95, "p_dw {p_dw}");
        assert!(p_dw < 1.0);
    }

    #[test]
    fn half_failed_paths_halve_age_99() {
        let mut fail_year = vec![47; 50];
        fail_year.extend(vec![0; 50]);
        let (p_dw, p99) = success_metrics(&fail_year, 53, 47);
        assert!((p99 - 0.5).abs() < 1e-12);
        assert!((p_dw - 0.5).abs() < 1e-12);
    }

    #[test]
    fn later_start_age_clamps_missing_table_ages_to_final_year() {
        // start_age 60, failure at model year 20 (age 80): table ages 53-59
        // fall outside the model range and take the final year's ruin
        // fraction, so only deaths at ages 60-79 count as funded.
        let fail_year = vec![20; 10];
        let n_years = (99 - 60 + 1) as usize;
        let (p_dw, p99) = success_metrics(&fail_year, 60, n_years);
        assert!(p99.abs() < 1e-12);
        assert!(p_dw > 0.0 && p_dw < 1.0);

        let (ages, weights) = death_weights();
        let expected: f64 = ages
            .iter()
            .zip(weights.iter())
            .filter(|&(age, _)| (60..80).contains(age))
            .map(|(_, w)| w)
            .sum();
        assert!((p_dw - expected).abs() < 1e-12);
    }
}
