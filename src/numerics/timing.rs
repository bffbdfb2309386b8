use std::time::{Duration, Instant};

/// Runs a closure and reports how long it took.
pub fn timed<F, R>(f: F) -> (R, Duration)
where
    F: FnOnce() -> R,
{
    let start = Instant::now();
    let result = f();
    (result, start.elapsed())
}

/// Accumulated wall time of the three stages of a training iteration:
/// batch assembly, network forward (with derivative tracking), and loss
/// computation. Purely observational.
#[derive(Debug, Default, Clone, Copy)]
pub struct StageTimings {
    pub data: Duration,
    pub forward: Duration,
    pub loss: Duration,
    pub iters: usize,
}

impl StageTimings {
    pub fn record(&mut self, data: Duration, forward: Duration, loss: Duration) {
        self.data += data;
        self.forward += forward;
        self.loss += loss;
        self.iters += 1;
    }

    pub fn total(&self) -> Duration {
        self.data + self.forward + self.loss
    }

    fn per_iter(&self, d: Duration) -> f64 {
        if self.iters == 0 {
            return 0.0;
        }
        d.as_secs_f64() / self.iters as f64
    }

    /// Fraction of the iteration spent in each stage (data, forward, loss).
    pub fn fractions(&self) -> [f64; 3] {
        let total = self.total().as_secs_f64();
        if total == 0.0 {
            return [0.0; 3];
        }
        [
            self.data.as_secs_f64() / total,
            self.forward.as_secs_f64() / total,
            self.loss.as_secs_f64() / total,
        ]
    }

    pub fn print_summary(&self) {
        if self.iters == 0 {
            return;
        }
        let [fd, fm, fl] = self.fractions();
        let iter_time = self.per_iter(self.total());
        println!("\n{}", "=".repeat(60));
        println!("{:^60}", "ITERATION TIMING SUMMARY");
        println!("{}", "=".repeat(60));
        println!("Iterations:         {}", self.iters);
        println!(
            "Data time/iter:     {:.4}s ({:.2}%)",
            self.per_iter(self.data),
            fd * 100.0
        );
        println!(
            "Forward time/iter:  {:.4}s ({:.2}%)",
            self.per_iter(self.forward),
            fm * 100.0
        );
        println!(
            "Loss time/iter:     {:.4}s ({:.2}%)",
            self.per_iter(self.loss),
            fl * 100.0
        );
        println!("Total time/iter:    {:.4}s", iter_time);
        println!("{}", "-".repeat(60));
        println!("1k iters:           {:.2}m", iter_time * 1e3 / 60.0);
        println!("10k iters:          {:.2}m", iter_time * 1e4 / 60.0);
        println!("100k iters:         {:.2}h", iter_time * 1e5 / 3600.0);
        println!("{}\n", "=".repeat(60));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractions_sum_to_one() {
        let mut t = StageTimings::default();
        t.record(
            Duration::from_millis(10),
            Duration::from_millis(30),
            Duration::from_millis(60),
        );
        let f = t.fractions();
        assert!((f.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(f[2] > f[1] && f[1] > f[0]);
    }
}
