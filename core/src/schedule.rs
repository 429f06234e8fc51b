/// Step decay: multiply by `gamma` every `step_size` ticks.
///
/// `lr(tick) = initial_lr * gamma^(tick / step_size)`. The loop ticks once at
/// the top of every epoch, before any batch, so epoch `e` trains with
/// `lr(e)`. A `step_size` of zero disables decay.
#[derive(Clone, Debug)]
pub struct StepSchedule {
    initial_lr: f64,
    step_size: usize,
    gamma: f64,
    ticks: usize,
}

impl StepSchedule {
    pub const DECAY: f64 = 0.1;

    pub fn new(initial_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            initial_lr,
            step_size,
            gamma,
            ticks: 0,
        }
    }

    /// Decay by ten every third of the run.
    pub fn for_run(initial_lr: f64, num_epochs: usize) -> Self {
        Self::new(initial_lr, num_epochs / 3, Self::DECAY)
    }

    pub fn step(&mut self) -> f64 {
        self.ticks += 1;
        self.lr()
    }

    pub fn lr(&self) -> f64 {
        if self.step_size == 0 {
            return self.initial_lr;
        }
        let exponent = (self.ticks / self.step_size) as i32;
        self.initial_lr * self.gamma.powi(exponent)
    }

    pub fn step_size(&self) -> usize {
        self.step_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * b.abs().max(1.0)
    }

    #[test]
    fn decays_by_ten_each_third_of_the_run() {
        let mut schedule = StepSchedule::for_run(1e-2, 10);
        assert_eq!(schedule.step_size(), 3);

        let rates: Vec<f64> = (0..10).map(|_| schedule.step()).collect();
        let expected = [1e-2, 1e-2, 1e-3, 1e-3, 1e-3, 1e-4, 1e-4, 1e-4, 1e-5, 1e-5];
        for (epoch, (rate, want)) in rates.iter().zip(expected).enumerate() {
            assert!(close(*rate, want), "epoch {}: {rate} != {want}", epoch + 1);
        }
    }

    #[test]
    fn consecutive_decays_differ_by_exactly_gamma() {
        let mut schedule = StepSchedule::for_run(1.0, 9);
        let rates: Vec<f64> = (0..9).map(|_| schedule.step()).collect();
        assert!(close(rates[2] / rates[1], 0.1));
        assert!(close(rates[5] / rates[4], 0.1));
        assert!(close(rates[8] / rates[7], 0.1));
    }

    #[test]
    fn short_runs_never_decay() {
        for num_epochs in 0..3 {
            let mut schedule = StepSchedule::for_run(1e-4, num_epochs);
            for _ in 0..5 {
                assert_eq!(schedule.step(), 1e-4);
            }
        }
    }

    #[test]
    fn untouched_schedule_reports_initial_rate() {
        assert_eq!(StepSchedule::for_run(3e-4, 30).lr(), 3e-4);
    }
}
