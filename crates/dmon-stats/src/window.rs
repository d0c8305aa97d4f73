/// Streaming mean and variance over the most recent `W` samples.
///
/// Uses a Welford-style update. Until the window is full each sample is
/// folded in with the usual incremental formulas; afterwards every insert
/// replaces the oldest sample and adjusts the accumulators by the difference,
/// so both reads and writes are O(1) and no sum of squares is ever kept.
#[derive(Debug, Clone)]
pub struct StatsWindow {
    samples: Vec<f64>,
    next: usize,
    count: usize,
    mean: f64,
    m2: f64,
}

impl StatsWindow {
    /// Create a window of `size` samples. A size of zero is raised to one.
    pub fn new(size: usize) -> Self {
        Self {
            samples: vec![0.0; size.max(1)],
            next: 0,
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    pub fn insert(&mut self, value: f64) {
        let size = self.samples.len();

        if self.count < size {
            self.count += 1;
            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        } else {
            let old = self.samples[self.next];
            let old_mean = self.mean;
            self.mean += (value - old) / size as f64;
            self.m2 += (value - old) * (value - self.mean + old - old_mean);
            if self.m2 < 0.0 {
                self.m2 = 0.0;
            }
        }

        self.samples[self.next] = value;
        self.next = (self.next + 1) % size;
    }

    /// Mean of the samples in the window; zero when empty.
    pub fn average(&self) -> f64 {
        self.mean
    }

    /// Population variance of the samples in the window; zero when empty.
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Number of samples currently in the window.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Window size `W`.
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Forget every sample.
    pub fn clear(&mut self) {
        self.next = 0;
        self.count = 0;
        self.mean = 0.0;
        self.m2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    const WINDOW: usize = 10_000;
    const EPSILON: f64 = 1e-9;

    /// Standard normal sample (Box-Muller).
    fn normal(rng: &mut StdRng) -> f64 {
        let u1: f64 = 1.0 - rng.gen::<f64>();
        let u2: f64 = rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    fn two_pass(values: &[f64]) -> (f64, f64) {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        (mean, var)
    }

    #[test]
    fn matches_two_pass_over_the_last_window() {
        let mut rng = StdRng::seed_from_u64(0x646d_6f6e);
        let mut window = StatsWindow::new(WINDOW);
        let mut batch = vec![0.0; WINDOW];

        for (mean, std_dev) in [(0.0, 1.0), (100.0, 2.0), (-100.0, 0.2)] {
            for slot in batch.iter_mut() {
                *slot = normal(&mut rng) * std_dev + mean;
                window.insert(*slot);
            }

            let (expected_mean, expected_var) = two_pass(&batch);
            assert!(
                (window.average() - expected_mean).abs() < EPSILON,
                "mean {} vs {expected_mean}",
                window.average()
            );
            assert!(
                (window.variance() - expected_var).abs() < EPSILON,
                "variance {} vs {expected_var}",
                window.variance()
            );
            assert_eq!(window.len(), WINDOW);
        }
    }

    #[test]
    fn partial_window_uses_inserted_samples_only() {
        let mut window = StatsWindow::new(100);
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            window.insert(v);
        }
        assert_eq!(window.len(), 8);
        assert!((window.average() - 5.0).abs() < 1e-12);
        assert!((window.variance() - 4.0).abs() < 1e-12);
        assert!((window.std_dev() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn oldest_sample_is_evicted() {
        let mut window = StatsWindow::new(3);
        for v in [1000.0, 1.0, 2.0, 3.0] {
            window.insert(v);
        }
        assert!((window.average() - 2.0).abs() < 1e-9);
        assert!((window.variance() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_and_degenerate_windows() {
        let mut window = StatsWindow::new(0);
        assert_eq!(window.capacity(), 1);
        assert!(window.is_empty());
        assert_eq!(window.average(), 0.0);
        assert_eq!(window.variance(), 0.0);

        window.insert(5.0);
        window.insert(7.0);
        assert_eq!(window.len(), 1);
        assert_eq!(window.average(), 7.0);
        assert_eq!(window.variance(), 0.0);

        window.clear();
        assert!(window.is_empty());
    }
}
