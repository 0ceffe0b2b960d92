// ===== Types and Structures =====

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdError {
    Timeout,
    CmdError,
    ClockStopped,
    NoCard,
    InvalidArgument,
    InvalidResponseType,
    UnsupportedConfig,
    TuningFailed,
    VoltageSwitchFailed,
}

impl fmt::Display for SdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdError::Timeout => write!(f, "Polled wait timed out"),
            SdError::CmdError => write!(f, "Error interrupt status reported"),
            SdError::ClockStopped => write!(f, "Bus clock is not enabled"),
            SdError::NoCard => write!(f, "No card detected"),
            SdError::InvalidArgument => write!(f, "Invalid argument"),
            SdError::InvalidResponseType => write!(f, "Invalid response type"),
            SdError::UnsupportedConfig => write!(f, "Unsupported controller configuration"),
            SdError::TuningFailed => write!(f, "Tuning did not converge"),
            SdError::VoltageSwitchFailed => write!(f, "1.8V signalling switch failed"),
        }
    }
}
