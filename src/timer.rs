use std::time::{Duration, Instant};

/// Wall-clock timer over a labelled section.
#[derive(Debug)]
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        log::info!("{label}");
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Logs `<label> - <seconds> sec.` and returns the elapsed time.
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        log::info!("{} - {:.4} sec.", self.label, elapsed.as_secs_f64());
        elapsed
    }
}
