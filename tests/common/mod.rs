#![allow(dead_code)]

use breakwater::error::{Classify, FailureKind};
use std::fmt;

/// Downstream stand-in carrying an HTTP-like status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusError(pub u16);

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "downstream answered {}", self.0)
    }
}

impl std::error::Error for StatusError {}

impl Classify for StatusError {
    fn failure_kind(&self) -> FailureKind {
        if (400..500).contains(&self.0) {
            FailureKind::Client
        } else {
            FailureKind::Transient
        }
    }
}

/// Fixed starting instant for manual clocks.
pub const EPOCH_MS: u64 = 1_700_000_000_000;
