/// Compensated running sum.
///
/// Planning passes accumulate experience from thousands of small predicted
/// operations; naive summation drifts linearly with the number of terms.
/// Kahan compensation keeps the error bounded independent of count.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KahanAccumulator {
    sum: f64,
    compensation: f64,
}

impl KahanAccumulator {
    pub fn new(initial: f64) -> Self {
        Self {
            sum: initial,
            compensation: 0.0,
        }
    }

    /// Add a value, folding the previous rounding error back in.
    pub fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        // (t - sum) should equal y exactly; the difference is the new error.
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compensated_sum_beats_naive_summation() {
        let mut kahan = KahanAccumulator::new(0.0);
        let mut naive = 0.0f64;
        for _ in 0..10_000 {
            kahan.add(1e-6);
            naive += 1e-6;
        }

        let expected = 0.01;
        let kahan_err = (kahan.sum() - expected).abs();
        let naive_err = (naive - expected).abs();

        assert!(kahan_err < 1e-9, "kahan error {kahan_err}");
        assert!(kahan_err <= naive_err);
    }

    #[test]
    fn test_initial_value_is_preserved() {
        let mut acc = KahanAccumulator::new(100.0);
        acc.add(0.5);
        assert!((acc.sum() - 100.5).abs() < 1e-12);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_repeated_addition_stays_near_exact(
                value in 1e-9f64..1e-3,
                count in 1usize..10_000,
            ) {
                let mut acc = KahanAccumulator::new(0.0);
                for _ in 0..count {
                    acc.add(value);
                }
                // `value * count` is a single correctly-rounded operation,
                // close enough to the exact sum to serve as reference.
                let reference = value * count as f64;
                let relative = (acc.sum() - reference).abs() / reference;
                prop_assert!(relative < 1e-12, "relative error {relative}");
            }
        }
    }
}
