//! Sample statistics shared by the accumulators.

/// Population mean of a sample. NaN for an empty sample.
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population variance (divides by N, not N - 1). NaN for an empty sample.
pub fn variance(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return f64::NAN;
    }
    let m = mean(samples);
    samples.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / samples.len() as f64
}

/// Mean and variance recovered from running sums. Used when no history was
/// kept; the sums merge by plain addition so the result does not depend on
/// merge order.
pub fn running_moments(sum: f64, squared_sum: f64, count: u64) -> (f64, f64) {
    if count == 0 {
        return (f64::NAN, f64::NAN);
    }
    let n = count as f64;
    let m = sum / n;
    // Clamp tiny negative values produced by cancellation.
    let var = (squared_sum / n - m * m).max(0.0);
    (m, var)
}

/// Symmetric confidence interval around `mean` using the two-sided
/// standard-normal critical value for `confidence_percent` (e.g. 95.0).
pub fn confidence_interval(mean: f64, std_dev: f64, n: usize, confidence_percent: f64) -> [f64; 2] {
    let alpha = 1.0 - confidence_percent / 100.0;
    let z = normal_quantile(1.0 - alpha / 2.0);
    let half_width = z * std_dev / (n as f64).sqrt();
    [mean - half_width, mean + half_width]
}

/// Inverse CDF of the standard normal distribution.
///
/// Acklam's rational approximation, relative error below 1.15e-9 over
/// (0, 1). Returns NaN outside (0, 1).
pub fn normal_quantile(p: f64) -> f64 {
    if !(p > 0.0 && p < 1.0) {
        return f64::NAN;
    }

    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_population_variance() {
        let samples = [13.0, 30.0, 11.0, 22.0, 4.0];
        assert!((mean(&samples) - 16.0).abs() < 1e-12);
        // numpy.var (ddof=0) of the same sample.
        assert!((variance(&samples) - 82.0).abs() < 1e-9);
    }

    #[test]
    fn empty_sample_is_nan() {
        assert!(mean(&[]).is_nan());
        assert!(variance(&[]).is_nan());
    }

    #[test]
    fn running_moments_match_direct_computation() {
        let samples = [3.0, 6.0, 1.0, 34.0, 12.0];
        let sum: f64 = samples.iter().sum();
        let sq: f64 = samples.iter().map(|x| x * x).sum();
        let (m, v) = running_moments(sum, sq, samples.len() as u64);
        assert!((m - mean(&samples)).abs() < 1e-12);
        assert!((v - variance(&samples)).abs() < 1e-9);
    }

    #[test]
    fn normal_quantile_known_points() {
        assert!(normal_quantile(0.5).abs() < 1e-9);
        assert!((normal_quantile(0.975) - 1.959_963_984_540_054).abs() < 1e-6);
        assert!((normal_quantile(0.995) - 2.575_829_303_548_901).abs() < 1e-6);
        assert!((normal_quantile(0.01) + 2.326_347_874_040_841).abs() < 1e-6);
        assert!(normal_quantile(0.0).is_nan());
        assert!(normal_quantile(1.0).is_nan());
    }

    #[test]
    fn confidence_interval_is_symmetric() {
        let [lo, hi] = confidence_interval(10.0, 2.0, 16, 95.0);
        let half = 1.959_963_984_540_054 * 2.0 / 4.0;
        assert!((lo - (10.0 - half)).abs() < 1e-6);
        assert!((hi - (10.0 + half)).abs() < 1e-6);
    }
}
