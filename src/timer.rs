use std::time::Duration;
use tokio::time::Instant;

#[derive(thiserror::Error, Debug)]
pub enum TimerError {
    #[error("Timeout Error")]
    TimeoutError,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeoutVal {
    #[default]
    Default,
    Forever,
    Duration(Duration),
}

impl TimeoutVal {
    pub fn from_millis(millis: u64) -> Self {
        TimeoutVal::Duration(Duration::from_millis(millis))
    }
}

pub fn timeout_to_duration(timeout: TimeoutVal) -> Duration {
    match timeout {
        TimeoutVal::Duration(duration) => duration,
        TimeoutVal::Default => Duration::from_secs(1),
        TimeoutVal::Forever => Duration::MAX
    }
}

/// Point in time at which an operation started now with `timeout` gives up,
/// `None` means never.
pub fn deadline(timeout: TimeoutVal) -> Option<Instant> {
    let duration = timeout_to_duration(timeout);
    Instant::now().checked_add(duration)
}

/// Time left until `deadline`, or a `TimeoutError` once it has passed.
pub fn remaining(deadline: Option<Instant>) -> Result<Duration, TimerError> {
    match deadline {
        None => Ok(Duration::MAX),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                Err(TimerError::TimeoutError)
            } else {
                Ok(deadline - now)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forever_has_no_deadline() {
        assert!(deadline(TimeoutVal::Forever).is_none());
        assert_eq!(remaining(None).unwrap(), Duration::MAX);
    }

    #[tokio::test]
    async fn expired_deadline_times_out() {
        let dl = deadline(TimeoutVal::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(matches!(remaining(dl), Err(TimerError::TimeoutError)));
    }
}
