use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{FailureClass, ReconnectDelay};

/// Reconnect delay tables for both failure classes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Allow one immediate reconnect before consulting the delay tables.
    pub immediate_first_reconnect: bool,
    /// First delay after a network failure, in milliseconds.
    pub network_first_ms: u64,
    /// Added per attempt (times `retry_count - 1`) for network failures.
    pub network_step_ms: u64,
    /// Network delays above this give up.
    pub network_max_ms: u64,
    /// First delay after an HTTP failure, in milliseconds.
    pub http_first_ms: u64,
    /// Growth factor for HTTP failures.
    pub http_multiplier: u64,
    /// HTTP delays above this give up.
    pub http_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            immediate_first_reconnect: true,
            network_first_ms: 250,
            network_step_ms: 250,
            network_max_ms: 16_000,
            http_first_ms: 5_000,
            http_multiplier: 2,
            http_max_ms: 320_000,
        }
    }
}

/// Last delay computed for one failure class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ClassDelay {
    /// No failure of this class since the last reset.
    #[default]
    Unset,
    /// Last delay handed out, in milliseconds.
    Delay(u64),
    /// Sticky give-up marker; only `reset` clears it.
    Exhausted,
}

impl From<ClassDelay> for ReconnectDelay {
    fn from(value: ClassDelay) -> Self {
        match value {
            ClassDelay::Unset | ClassDelay::Delay(0) => ReconnectDelay::Immediate,
            ClassDelay::Delay(ms) => ReconnectDelay::After(Duration::from_millis(ms)),
            ClassDelay::Exhausted => ReconnectDelay::Exhausted,
        }
    }
}

/// Snapshot of the policy counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BackoffState {
    pub network_delay: ClassDelay,
    pub http_delay: ClassDelay,
    pub retry_count: u32,
}

/// Reconnect policy with independent linear (network) and exponential (HTTP) tracks.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    state: BackoffState,
}

impl BackoffPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            state: BackoffState::default(),
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    pub fn state(&self) -> BackoffState {
        self.state
    }

    /// Compute the delay before the next attempt and advance the matching track.
    pub fn next_delay(&mut self, class: FailureClass) -> ReconnectDelay {
        if self.config.immediate_first_reconnect && self.state.retry_count == 0 {
            self.state.retry_count = 1;
            return ReconnectDelay::Immediate;
        }

        self.state.retry_count = self.state.retry_count.saturating_add(1);

        let next = match class {
            FailureClass::Network => {
                let next = self.next_network_delay();
                self.state.network_delay = next;
                next
            }
            FailureClass::Application => {
                let next = self.next_http_delay();
                self.state.http_delay = next;
                next
            }
        };

        next.into()
    }

    /// Forget every failure; the next call is the immediate one again.
    pub fn reset(&mut self) {
        self.state = BackoffState::default();
    }

    fn next_network_delay(&self) -> ClassDelay {
        match self.state.network_delay {
            ClassDelay::Unset => ClassDelay::Delay(self.config.network_first_ms),
            ClassDelay::Exhausted => ClassDelay::Exhausted,
            ClassDelay::Delay(last) => {
                let attempts = u64::from(self.state.retry_count.saturating_sub(1));
                let grown = last.saturating_add(self.config.network_step_ms.saturating_mul(attempts));
                if grown > self.config.network_max_ms {
                    ClassDelay::Exhausted
                } else {
                    ClassDelay::Delay(grown)
                }
            }
        }
    }

    fn next_http_delay(&self) -> ClassDelay {
        match self.state.http_delay {
            ClassDelay::Unset => ClassDelay::Delay(self.config.http_first_ms),
            ClassDelay::Exhausted => ClassDelay::Exhausted,
            ClassDelay::Delay(last) => {
                let grown = last.saturating_mul(self.config.http_multiplier);
                if grown > self.config.http_max_ms {
                    ClassDelay::Exhausted
                } else {
                    ClassDelay::Delay(grown)
                }
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(ms: u64) -> ReconnectDelay {
        ReconnectDelay::After(Duration::from_millis(ms))
    }

    #[test]
    fn first_call_is_immediate_for_any_class() {
        let mut policy = BackoffPolicy::default();
        assert_eq!(
            policy.next_delay(FailureClass::Application),
            ReconnectDelay::Immediate
        );
        assert_eq!(policy.state().retry_count, 1);
        assert_eq!(policy.state().http_delay, ClassDelay::Unset);
    }

    #[test]
    fn network_track_grows_by_step_times_attempt_until_cap() {
        let mut policy = BackoffPolicy::default();
        assert_eq!(
            policy.next_delay(FailureClass::Network),
            ReconnectDelay::Immediate
        );

        let expected = [
            250, 750, 1_500, 2_500, 3_750, 5_250, 7_000, 9_000, 11_250, 13_750,
        ];
        for ms in expected {
            assert_eq!(policy.next_delay(FailureClass::Network), millis(ms));
        }

        // 13_750 + 250 * 11 = 16_500 exceeds the 16 s ceiling.
        assert_eq!(
            policy.next_delay(FailureClass::Network),
            ReconnectDelay::Exhausted
        );
        assert_eq!(
            policy.next_delay(FailureClass::Network),
            ReconnectDelay::Exhausted
        );
        assert_eq!(policy.state().network_delay, ClassDelay::Exhausted);
    }

    #[test]
    fn http_track_doubles_until_cap() {
        let mut policy = BackoffPolicy::default();
        policy.next_delay(FailureClass::Application);

        for ms in [5_000, 10_000, 20_000, 40_000, 80_000, 160_000, 320_000] {
            assert_eq!(policy.next_delay(FailureClass::Application), millis(ms));
        }
        assert_eq!(
            policy.next_delay(FailureClass::Application),
            ReconnectDelay::Exhausted
        );
    }

    #[test]
    fn classes_advance_independently() {
        let mut policy = BackoffPolicy::default();
        policy.next_delay(FailureClass::Network);

        assert_eq!(policy.next_delay(FailureClass::Network), millis(250));
        assert_eq!(policy.next_delay(FailureClass::Application), millis(5_000));
        // retry_count is shared: 250 + 250 * 3.
        assert_eq!(policy.next_delay(FailureClass::Network), millis(1_000));
        assert_eq!(policy.next_delay(FailureClass::Application), millis(10_000));

        let state = policy.state();
        assert_eq!(state.retry_count, 5);
        assert_eq!(state.network_delay, ClassDelay::Delay(1_000));
        assert_eq!(state.http_delay, ClassDelay::Delay(10_000));
    }

    #[test]
    fn exhausting_one_class_leaves_the_other_usable() {
        let mut policy = BackoffPolicy::new(BackoffConfig {
            network_max_ms: 300,
            ..BackoffConfig::default()
        });
        policy.next_delay(FailureClass::Network);
        assert_eq!(policy.next_delay(FailureClass::Network), millis(250));
        assert_eq!(
            policy.next_delay(FailureClass::Network),
            ReconnectDelay::Exhausted
        );
        assert_eq!(policy.next_delay(FailureClass::Application), millis(5_000));
    }

    #[test]
    fn reset_restores_the_immediate_first_attempt() {
        let mut policy = BackoffPolicy::default();
        policy.next_delay(FailureClass::Network);
        policy.next_delay(FailureClass::Network);
        policy.next_delay(FailureClass::Application);

        policy.reset();
        assert_eq!(policy.state(), BackoffState::default());
        assert_eq!(
            policy.next_delay(FailureClass::Application),
            ReconnectDelay::Immediate
        );
        assert_eq!(policy.next_delay(FailureClass::Network), millis(250));
    }

    #[test]
    fn without_immediate_first_reconnect_the_tables_apply_at_once() {
        let mut policy = BackoffPolicy::new(BackoffConfig {
            immediate_first_reconnect: false,
            ..BackoffConfig::default()
        });
        assert_eq!(policy.next_delay(FailureClass::Application), millis(5_000));
        assert_eq!(policy.state().retry_count, 1);
    }
}
