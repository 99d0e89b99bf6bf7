/// What a hook sees after each training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInfo {
    /// Step number over the whole life of the model directory, starting at 1.
    pub global_step: usize,
    /// Step number inside the current `train` call, starting at 1.
    pub local_step: usize,
    /// Loss of the batch that was just optimized.
    pub loss: f64,
    /// Fraction of correct predictions since the beginning of the current `train` call.
    pub accuracy: f64,
    pub learning_rate: f64,
}

/// Observer of a training pass.
pub trait TrainingHook {
    fn begin(&mut self, _global_step: usize) {}
    fn after_step(&mut self, step: &StepInfo);
    fn end(&mut self, _last: Option<&StepInfo>) {}
}

/// Logs `train_accuracy`, `train_loss` and `learning_rate` every `every_n_iter` steps.
#[derive(Debug, Clone)]
pub struct LoggingHook {
    every_n_iter: usize,
    lines: usize,
}

impl LoggingHook {
    pub fn new(every_n_iter: usize) -> Self {
        Self {
            every_n_iter: every_n_iter.max(1),
            lines: 0,
        }
    }

    /// Whether the 1-based `local_step` gets a log line. Step `0` never does.
    pub fn should_log(&self, local_step: usize) -> bool {
        local_step
            .checked_sub(1)
            .is_some_and(|step| step % self.every_n_iter == 0)
    }

    /// Number of lines emitted so far.
    pub fn lines(&self) -> usize {
        self.lines
    }
}

impl TrainingHook for LoggingHook {
    fn begin(&mut self, global_step: usize) {
        log::info!("training from global_step = {global_step}");
    }

    fn after_step(&mut self, step: &StepInfo) {
        if !self.should_log(step.local_step) {
            return;
        }
        self.lines += 1;
        log::info!(
            "global_step = {}, train_accuracy = {:.4}, train_loss = {:.6}, learning_rate = {}",
            step.global_step,
            step.accuracy,
            step.loss,
            step.learning_rate,
        );
    }

    fn end(&mut self, last: Option<&StepInfo>) {
        if let Some(step) = last {
            log::info!(
                "loss for final step: {:.6} (global_step = {})",
                step.loss,
                step.global_step
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(local_step: usize) -> StepInfo {
        StepInfo {
            global_step: local_step + 100,
            local_step,
            loss: 0.5,
            accuracy: 0.5,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn logs_first_step_then_every_n() {
        let mut hook = LoggingHook::new(10);
        for local_step in 1..=25 {
            hook.after_step(&step(local_step));
        }
        // steps 1, 11 and 21
        assert_eq!(hook.lines(), 3);
    }

    #[test]
    fn step_zero_is_never_logged() {
        let mut hook = LoggingHook::new(1);
        assert!(!hook.should_log(0));
        assert!(hook.should_log(1));
        hook.after_step(&step(0));
        assert_eq!(hook.lines(), 0);
    }

    #[test]
    fn zero_period_logs_every_step() {
        let mut hook = LoggingHook::new(0);
        for local_step in 1..=4 {
            hook.after_step(&step(local_step));
        }
        assert_eq!(hook.lines(), 4);
    }
}
