//! Operator commands accepted by the scheduler

use thiserror::Error;

use crate::config::defaults::{MAX_INTERVAL_MINUTES, MIN_INTERVAL_MINUTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    TriggerBootstrap,
    /// Run one cycle now and restart the interval timer
    ForceAnalysis,
    SetInterval(u64),
    SetAiEnabled(bool),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("interval must be between 1 and 30 minutes, got {0}")]
    InvalidInterval(u64),

    #[error("bootstrap already running")]
    BootstrapAlreadyRunning,

    #[error("command queue full")]
    QueueFull,

    #[error("scheduler stopped")]
    Closed,
}

pub const fn validate_interval(minutes: u64) -> Result<u64, CommandError> {
    if minutes < MIN_INTERVAL_MINUTES || minutes > MAX_INTERVAL_MINUTES {
        Err(CommandError::InvalidInterval(minutes))
    } else {
        Ok(minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_bounds() {
        assert_eq!(validate_interval(1), Ok(1));
        assert_eq!(validate_interval(30), Ok(30));
        assert_eq!(validate_interval(0), Err(CommandError::InvalidInterval(0)));
        assert_eq!(validate_interval(31), Err(CommandError::InvalidInterval(31)));
    }

    #[test]
    fn test_invalid_interval_message() {
        assert_eq!(
            CommandError::InvalidInterval(45).to_string(),
            "interval must be between 1 and 30 minutes, got 45"
        );
    }
}
