//! Sampling helpers over the single deterministic RNG stream.
//!
//! Every stochastic decision in the pipeline goes through one
//! `StdRng::seed_from_u64` stream, consumed in a declared iteration order.
//! These helpers implement the handful of distributions the generators need
//! directly on top of `rand::Rng` so the draw sequence is fully owned by
//! this crate.

use rand::Rng;

/// Exponential inter-arrival gap with the given rate (events per unit time).
/// Returns the gap in the same unit the rate was expressed in.
pub fn exponential<R: Rng>(rng: &mut R, rate: f64) -> f64 {
    let u: f64 = rng.gen_range(f64::EPSILON..1.0);
    -u.ln() / rate
}

/// Poisson draw via Knuth's product method. Rates in this pipeline stay in
/// the single digits; the iteration cap guards the degenerate-rate case.
pub fn poisson<R: Rng>(rng: &mut R, lambda: f64) -> u64 {
    if lambda <= 0.0 {
        return 0;
    }
    let limit = (-lambda).exp();
    let mut k: u64 = 0;
    let mut p = 1.0f64;
    loop {
        p *= rng.gen_range(0.0f64..1.0);
        if p <= limit || k > 10_000 {
            return k;
        }
        k += 1;
    }
}

/// Standard normal draw, Box-Muller. The second variate is discarded to keep
/// the stream position a pure function of draw count.
pub fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0f64..1.0);
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

pub fn lognormal<R: Rng>(rng: &mut R, mu: f64, sigma: f64) -> f64 {
    (mu + sigma * standard_normal(rng)).exp()
}

/// Gamma draw, Marsaglia-Tsang squeeze for shape >= 1 with the standard
/// boost for shape < 1. Unit scale.
fn gamma<R: Rng>(rng: &mut R, shape: f64) -> f64 {
    if shape < 1.0 {
        let u: f64 = rng.gen_range(f64::EPSILON..1.0);
        return gamma(rng, shape + 1.0) * u.powf(1.0 / shape);
    }
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x = standard_normal(rng);
        let v = (1.0 + c * x).powi(3);
        if v <= 0.0 {
            continue;
        }
        let u: f64 = rng.gen_range(f64::EPSILON..1.0);
        if u.ln() < 0.5 * x * x + d - d * v + d * v.ln() {
            return d * v;
        }
    }
}

pub fn beta<R: Rng>(rng: &mut R, alpha: f64, b: f64) -> f64 {
    let x = gamma(rng, alpha);
    let y = gamma(rng, b);
    x / (x + y)
}

/// Beta draw centered on `mean` with spread controlled by `concentration`
/// (higher = tighter). The mean is clamped away from the endpoints so both
/// shape parameters stay positive.
pub fn beta_around<R: Rng>(rng: &mut R, mean: f64, concentration: f64) -> f64 {
    let m = mean.clamp(0.02, 0.98);
    beta(rng, m * concentration, (1.0 - m) * concentration)
}

/// Index draw proportional to the given weights. Falls back to the last
/// index on floating-point shortfall.
pub fn weighted_index<R: Rng>(rng: &mut R, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    let mut target = rng.gen_range(0.0f64..total.max(f64::EPSILON));
    for (i, w) in weights.iter().enumerate() {
        if target < *w {
            return i;
        }
        target -= w;
    }
    weights.len().saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn poisson_mean_tracks_lambda() {
        let mut rng = StdRng::seed_from_u64(42);
        let n = 20_000;
        let total: u64 = (0..n).map(|_| poisson(&mut rng, 3.0)).sum();
        let mean = total as f64 / n as f64;
        assert!((mean - 3.0).abs() < 0.1, "mean {} too far from 3.0", mean);
    }

    #[test]
    fn poisson_zero_rate_yields_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(poisson(&mut rng, 0.0), 0);
        assert_eq!(poisson(&mut rng, -1.0), 0);
    }

    #[test]
    fn beta_stays_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..5_000 {
            let x = beta_around(&mut rng, 0.4, 8.0);
            assert!((0.0..=1.0).contains(&x));
        }
    }

    #[test]
    fn beta_around_centers_on_mean() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 20_000;
        let total: f64 = (0..n).map(|_| beta_around(&mut rng, 0.6, 10.0)).sum();
        let mean = total / n as f64;
        assert!((mean - 0.6).abs() < 0.05, "mean {} too far from 0.6", mean);
    }

    #[test]
    fn lognormal_is_positive() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..5_000 {
            assert!(lognormal(&mut rng, 3.0, 0.5) > 0.0);
        }
    }

    #[test]
    fn exponential_inverse_rate_mean() {
        let mut rng = StdRng::seed_from_u64(5);
        let n = 20_000;
        let total: f64 = (0..n).map(|_| exponential(&mut rng, 2.0)).sum();
        let mean = total / n as f64;
        assert!((mean - 0.5).abs() < 0.05, "mean {} too far from 0.5", mean);
    }

    #[test]
    fn weighted_index_respects_mass() {
        let mut rng = StdRng::seed_from_u64(9);
        let weights = [0.7, 0.2, 0.1];
        let mut counts = [0usize; 3];
        for _ in 0..10_000 {
            counts[weighted_index(&mut rng, &weights)] += 1;
        }
        assert!(counts[0] > counts[1] && counts[1] > counts[2]);
    }

    #[test]
    fn same_seed_same_stream() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            assert_eq!(poisson(&mut a, 2.5), poisson(&mut b, 2.5));
        }
    }
}
