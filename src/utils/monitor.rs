use std::time::{Duration, Instant};

/// 遠端呼叫耗時分級
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceRating {
    Excellent,
    Good,
    Slow,
    Critical,
}

impl PerformanceRating {
    pub fn from_duration(duration: Duration) -> Self {
        match duration.as_millis() {
            0..=499 => Self::Excellent,
            500..=1999 => Self::Good,
            2000..=4999 => Self::Slow,
            _ => Self::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Slow => "slow",
            Self::Critical => "critical",
        }
    }
}

/// Times one remote call and logs it on completion.
pub struct CallTimer {
    operation: &'static str,
    start_time: Instant,
}

impl CallTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn finish(self, outcome: &str) -> PerformanceRating {
        let elapsed = self.elapsed();
        let rating = PerformanceRating::from_duration(elapsed);

        match rating {
            PerformanceRating::Slow | PerformanceRating::Critical => tracing::warn!(
                operation = self.operation,
                duration_ms = elapsed.as_millis() as u64,
                rating = rating.as_str(),
                "🐢 {} {}",
                self.operation,
                outcome
            ),
            _ => tracing::debug!(
                operation = self.operation,
                duration_ms = elapsed.as_millis() as u64,
                rating = rating.as_str(),
                "📡 {} {}",
                self.operation,
                outcome
            ),
        }

        rating
    }
}
