//! Errors raised while resolving transport options.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("congestion control algorithm {0:?} is not found")]
    UnknownCongestionControl(String),
    #[error("hystart algorithm {0:?} is not found")]
    UnknownHystart(String),
}
