// Statistical helpers: information measures, proportions and significance tests

/// z for a two-sided 95% interval.
pub const Z_95: f64 = 1.959_963_985;
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;
pub const POWER_THRESHOLD: f64 = 0.8;

pub fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Shannon entropy (bits) of a count distribution.
pub fn entropy(counts: &[usize]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

/// Entropy scaled into [0, 1] by the maximum for the number of categories.
pub fn normalized_entropy(counts: &[usize]) -> f64 {
    let categories = counts.iter().filter(|&&c| c > 0).count();
    if categories <= 1 {
        return 0.0;
    }
    (entropy(counts) / (categories as f64).log2()).clamp(0.0, 1.0)
}

/// Joint presence counts of two binary indicators over `total` sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contingency {
    pub both: usize,
    pub only_a: usize,
    pub only_b: usize,
    pub neither: usize,
}

impl Contingency {
    pub fn from_counts(count_a: usize, count_b: usize, both: usize, total: usize) -> Self {
        let only_a = count_a.saturating_sub(both);
        let only_b = count_b.saturating_sub(both);
        let neither = total.saturating_sub(both + only_a + only_b);
        Self {
            both,
            only_a,
            only_b,
            neither,
        }
    }

    pub fn total(&self) -> usize {
        self.both + self.only_a + self.only_b + self.neither
    }

    /// Mutual information (bits) over the four joint states.
    pub fn mutual_information(&self) -> f64 {
        let n = self.total();
        if n == 0 {
            return 0.0;
        }
        let n = n as f64;
        let a1 = (self.both + self.only_a) as f64 / n;
        let b1 = (self.both + self.only_b) as f64 / n;
        let cells = [
            (self.both, a1, b1),
            (self.only_a, a1, 1.0 - b1),
            (self.only_b, 1.0 - a1, b1),
            (self.neither, 1.0 - a1, 1.0 - b1),
        ];
        cells
            .iter()
            .filter(|(count, pa, pb)| *count > 0 && *pa > 0.0 && *pb > 0.0)
            .map(|&(count, pa, pb)| {
                let joint = count as f64 / n;
                joint * (joint / (pa * pb)).log2()
            })
            .sum::<f64>()
            .max(0.0)
    }
}

/// Standard normal CDF (Abramowitz & Stegun 7.1.26 erf approximation).
pub fn normal_cdf(z: f64) -> f64 {
    let x = z.abs() / std::f64::consts::SQRT_2;
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    let erf = 1.0 - poly * (-x * x).exp();
    if z >= 0.0 {
        0.5 * (1.0 + erf)
    } else {
        0.5 * (1.0 - erf)
    }
}

/// Half-width of the 95% Wilson score interval for a proportion.
pub fn margin_of_error(p: f64, n: usize) -> f64 {
    if n == 0 {
        return 1.0;
    }
    let p = p.clamp(0.0, 1.0);
    let n = n as f64;
    let z2 = Z_95 * Z_95;
    Z_95 / (1.0 + z2 / n) * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinomialTest {
    pub z_score: f64,
    pub p_value: f64,
    pub power: f64,
    pub significant: bool,
}

/// Two-sided normal-approximation binomial test of `observed` against `null_p`.
pub fn binomial_test(observed: f64, null_p: f64, n: usize) -> BinomialTest {
    let null_p = null_p.clamp(1e-6, 1.0 - 1e-6);
    if n == 0 {
        return BinomialTest {
            z_score: 0.0,
            p_value: 1.0,
            power: 0.0,
            significant: false,
        };
    }
    let se = (null_p * (1.0 - null_p) / n as f64).sqrt();
    let z = (observed - null_p) / se;
    let p_value = (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0);
    // Power at the observed effect size
    let power = normal_cdf(z.abs() - Z_95).clamp(0.0, 1.0);
    BinomialTest {
        z_score: z,
        p_value,
        power,
        significant: p_value < SIGNIFICANCE_LEVEL,
    }
}

/// Coefficient of variation of `values` scaled into [0, 1].
pub fn dispersion(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = statistical::mean(values);
    if mean <= 0.0 {
        return 0.0;
    }
    let sd = statistical::population_standard_deviation(values, Some(mean));
    // Largest CV for n values in [0, 1] is sqrt(n - 1)
    let max_cv = ((values.len() - 1) as f64).sqrt();
    (sd / mean / max_cv).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy() {
        assert_eq!(entropy(&[]), 0.0);
        assert!((entropy(&[5, 5]) - 1.0).abs() < 1e-12);
        assert!((normalized_entropy(&[10, 10, 10, 10]) - 1.0).abs() < 1e-12);
        assert_eq!(normalized_entropy(&[10, 0]), 0.0);
        assert!(normalized_entropy(&[99, 1]) < 0.1);
    }

    #[test]
    fn test_mutual_information_identical_indicators() {
        // Present together on 2 of 3 sites
        let c = Contingency::from_counts(2, 2, 2, 3);
        assert_eq!(c.neither, 1);
        let expected = -(2.0f64 / 3.0) * (2.0f64 / 3.0).log2() - (1.0f64 / 3.0) * (1.0f64 / 3.0).log2();
        assert!((c.mutual_information() - expected).abs() < 1e-9);
        assert!(c.mutual_information() > 0.0);
    }

    #[test]
    fn test_mutual_information_independent() {
        let c = Contingency::from_counts(50, 50, 25, 100);
        assert!(c.mutual_information().abs() < 1e-12);
        assert_eq!(Contingency::from_counts(0, 0, 0, 0).mutual_information(), 0.0);
    }

    #[test]
    fn test_normal_cdf() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-6);
        assert!((normal_cdf(Z_95) - 0.975).abs() < 1e-4);
        assert!((normal_cdf(-Z_95) - 0.025).abs() < 1e-4);
    }

    #[test]
    fn test_margin_of_error() {
        assert!((margin_of_error(0.5, 100) - 0.0962).abs() < 1e-3);
        assert_eq!(margin_of_error(0.5, 0), 1.0);
        assert!(margin_of_error(1.0, 50) > 0.0);
        assert!(margin_of_error(1.0, 50) < margin_of_error(1.0, 10));
    }

    #[test]
    fn test_binomial_test() {
        let strong = binomial_test(0.9, 0.5, 100);
        assert!(strong.significant);
        assert!(strong.power > POWER_THRESHOLD);
        let weak = binomial_test(0.52, 0.5, 20);
        assert!(!weak.significant);
        assert!(weak.power < POWER_THRESHOLD);
        assert_eq!(binomial_test(0.9, 0.5, 0).p_value, 1.0);
    }

    #[test]
    fn test_dispersion() {
        assert_eq!(dispersion(&[0.3, 0.3, 0.3]), 0.0);
        assert!((dispersion(&[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert_eq!(dispersion(&[0.4]), 0.0);
    }
}
