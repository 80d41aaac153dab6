//! Pipeline stages and their orchestration.
//!
//! Data flows Source → entry topic → Classifier → classification topic →
//! Responder → response topic → Reviewer → final topic → Sink. Each stage
//! runs its own poll loop on its own broker handle and stops cooperatively
//! once its run duration has elapsed.

pub mod orchestrator;
pub mod sink;
pub mod source;
pub mod stages;
pub mod topics;
pub mod transform;

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

pub use orchestrator::Orchestrator;
pub use sink::{ConsoleRenderer, FinalView, Renderer, SinkStage};
pub use source::SourceStage;
pub use stages::{Classifier, Responder, Reviewer};
pub use topics::{ensure_topics, pipeline_topics};
pub use transform::{CompletionMode, Outcome, Route, Transform, TransformStage};

/// Wall-clock budget for one stage's run.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    started: Instant,
    duration: Duration,
}

impl RunClock {
    pub fn start(duration: Duration) -> Self {
        Self {
            started: Instant::now(),
            duration,
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn deadline(&self) -> Instant {
        self.started + self.duration
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.duration
    }

    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.started.elapsed())
    }
}

/// Per-stage message counters, reported when a stage stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    pub received: u64,
    pub published: u64,
    pub dropped: u64,
}

impl fmt::Display for StageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "received={} published={} dropped={}",
            self.received, self.published, self.dropped
        )
    }
}

/// Polling parameters shared by every consuming stage.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub timeout: Duration,
    pub batch_size: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            batch_size: 100,
        }
    }
}

impl PollSettings {
    /// Poll timeout clamped to what is left of the run
    pub fn timeout_within(&self, clock: &RunClock) -> Duration {
        self.timeout.min(clock.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_clock_expires() {
        let clock = RunClock::start(Duration::from_millis(20));
        assert!(!clock.expired());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(clock.expired());
        assert_eq!(clock.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_poll_timeout_is_clamped_to_remaining_time() {
        let settings = PollSettings {
            timeout: Duration::from_secs(1),
            batch_size: 10,
        };
        let clock = RunClock::start(Duration::from_millis(100));
        assert!(settings.timeout_within(&clock) <= Duration::from_millis(100));

        let clock = RunClock::start(Duration::ZERO);
        assert_eq!(settings.timeout_within(&clock), Duration::ZERO);
    }

    #[test]
    fn test_stats_display() {
        let stats = StageStats {
            received: 3,
            published: 2,
            dropped: 1,
        };
        assert_eq!(stats.to_string(), "received=3 published=2 dropped=1");
    }
}
