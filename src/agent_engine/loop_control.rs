// Step and wall-clock limits for a single turn.
use std::time::Duration;

use tokio::time::Instant;

use crate::agent_engine::event_bus::FinishReason;
use crate::config::AgentConfig;

pub struct LoopController {
    max_steps: u32,
    max_duration: Duration,
    start_time: Instant,
    steps: u32,
}

impl LoopController {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            max_duration: Duration::from_secs(config.max_turn_seconds),
            start_time: Instant::now(),
            steps: 0,
        }
    }

    pub fn record_step(&mut self) -> u32 {
        self.steps += 1;
        self.steps
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Wall-clock budget left for the turn; bounds each model call.
    pub fn remaining(&self) -> Duration {
        self.max_duration.saturating_sub(self.start_time.elapsed())
    }

    /// Checked before every model call.
    pub fn limit_reached(&self) -> Option<FinishReason> {
        if self.steps >= self.max_steps {
            return Some(FinishReason::StepLimit);
        }
        if self.start_time.elapsed() >= self.max_duration {
            return Some(FinishReason::TimeLimit);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_steps: u32, max_turn_seconds: u64) -> AgentConfig {
        AgentConfig {
            max_steps,
            max_turn_seconds,
            ..AgentConfig::default()
        }
    }

    #[test]
    fn stops_at_step_limit() {
        let mut ctrl = LoopController::new(&config(2, 300));
        assert_eq!(ctrl.limit_reached(), None);
        ctrl.record_step();
        assert_eq!(ctrl.limit_reached(), None);
        assert_eq!(ctrl.record_step(), 2);
        assert_eq!(ctrl.limit_reached(), Some(FinishReason::StepLimit));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_time_limit() {
        let ctrl = LoopController::new(&config(30, 10));
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(ctrl.limit_reached(), None);
        assert_eq!(ctrl.remaining(), Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(ctrl.limit_reached(), Some(FinishReason::TimeLimit));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(ctrl.remaining(), Duration::ZERO);
    }
}
