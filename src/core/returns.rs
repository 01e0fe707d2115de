use std::f64::consts::PI;

/// Real annual returns for every path, row-major: `data[path * n_years + year]`.
///
/// Generated once per scenario and shared read-only by every optimizer probe
/// and grid point, so the search objective is a pure function of `E`.
#[derive(Debug, Clone)]
pub struct ReturnsMatrix {
    n_sims: usize,
    n_years: usize,
    data: Vec<f64>,
}

impl ReturnsMatrix {
    pub fn n_sims(&self) -> usize {
        self.n_sims
    }

    pub fn n_years(&self) -> usize {
        self.n_years
    }

    pub fn path(&self, path: usize) -> &[f64] {
        let start = path * self.n_years;
        &self.data[start..start + self.n_years]
    }
}

/// i.i.d. normal real returns with mean `mu` and stdev `vol`, clipped below
/// at -99%. Each path draws from its own stream so the matrix is identical
/// for a given `(seed, n_sims, n_years)` regardless of generation order.
pub fn generate_returns(
    seed: u64,
    n_sims: usize,
    n_years: usize,
    mu: f64,
    vol: f64,
) -> ReturnsMatrix {
    let mut data = Vec::with_capacity(n_sims * n_years);
    for path in 0..n_sims {
        let mut rng = Rng::new(derive_seed(seed, path as u64));
        for _ in 0..n_years {
            let r = mu + vol * rng.standard_normal();
            data.push(r.max(-0.99));
        }
    }

    ReturnsMatrix {
        n_sims,
        n_years,
        data,
    }
}

fn derive_seed(base_seed: u64, path: u64) -> u64 {
    splitmix64(base_seed ^ (path << 32) ^ path)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct Rng {
    state: u64,
    cached_normal: Option<f64>,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self {
            state,
            cached_normal: None,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        let z0 = r * theta.cos();
        let z1 = r * theta.sin();
        self.cached_normal = Some(z1);
        z0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_has_requested_shape() {
        let m = generate_returns(7, 12, 47, 0.04, 0.10);
        assert_eq!(m.n_sims(), 12);
        assert_eq!(m.n_years(), 47);
        for path in 0..12 {
            assert_eq!(m.path(path).len(), 47);
        }
    }

    #[test]
    fn same_seed_is_bit_identical() {
        let a = generate_returns(424_242, 50, 47, 0.04, 0.10);
        let b = generate_returns(424_242, 50, 47, 0.04, 0.10);
        for path in 0..50 {
            assert_eq!(a.path(path), b.path(path));
        }
    }

    #[test]
    fn different_seeds_differ() {
        let a = generate_returns(1, 4, 47, 0.04, 0.10);
        let b = generate_returns(2, 4, 47, 0.04, 0.10);
        assert_ne!(a.path(0), b.path(0));
    }

    #[test]
    fn returns_are_clipped_at_minus_99_percent() {
        // Absurd volatility forces draws deep into the clipped region.
        let m = generate_returns(3, 200, 47, 0.0, 50.0);
        let mut clipped = 0;
        for path in 0..200 {
            for &r in m.path(path) {
                assert!(r >= -0.99);
                if r == -0.99 {
                    clipped += 1;
                }
            }
        }
        assert!(clipped > 0, "expected at least one clipped draw");
    }

    #[test]
    fn zero_vol_returns_equal_mu() {
        let m = generate_returns(9, 3, 10, 0.04, 0.0);
        for path in 0..3 {
            for &r in m.path(path) {
                assert!((r - 0.04).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn sample_moments_are_roughly_right() {
        let m = generate_returns(11, 2_000, 40, 0.05, 0.15);
        let n = (2_000 * 40) as f64;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for path in 0..2_000 {
            for &r in m.path(path) {
                sum += r;
                sum_sq += r * r;
            }
        }
        let mean = sum / n;
        let var = sum_sq / n - mean * mean;
        assert!((mean - 0.05).abs() < 0.005, "mean {mean}");
        assert!((var.sqrt() - 0.15).abs() < 0.01, "stdev {}", var.sqrt());
    }
}
