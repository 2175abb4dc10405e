//! Connection lifecycle states and the optional reconnect schedule.

use std::time::Duration;

const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(500);
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff { attempt: u32, delay: Duration },
}

/// What happens when the live transport drops without `disconnect` being called.
///
/// `Disabled` treats the first drop as terminal. `Backoff` waits
/// `min(base * 2^(attempt - 1), max_delay)` before each reopen and gives up
/// after `max_attempts` consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    #[default]
    Disabled,
    Backoff {
        base: Duration,
        max_delay: Duration,
        max_attempts: u32,
    },
}

impl ReconnectPolicy {
    pub fn backoff(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self::Backoff {
            base,
            max_delay,
            max_attempts,
        }
    }

    pub fn default_backoff() -> Self {
        Self::backoff(
            DEFAULT_BACKOFF_BASE,
            DEFAULT_BACKOFF_MAX,
            DEFAULT_BACKOFF_ATTEMPTS,
        )
    }

    /// Delay before reconnect attempt `attempt` (1-based), or `None` once exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        match *self {
            Self::Disabled => None,
            Self::Backoff {
                base,
                max_delay,
                max_attempts,
            } => {
                if attempt == 0 || attempt > max_attempts {
                    return None;
                }
                let factor = 1_u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
                Some(base.saturating_mul(factor).min(max_delay))
            }
        }
    }
}
