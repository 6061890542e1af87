// SPDX-License-Identifier: MIT
//
// HWRNG Pool: Buffered Hardware Entropy Driver
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara
//
// https://github.com/yourusername/hwrng-pool

//! Error types for the entropy driver
//!
//! Provides a unified error taxonomy using `thiserror` for ergonomic error handling.
//! Most kinds are benign: the driver resolves them by retrying, throttling the
//! generator or delivering a partial result, never by failing a blocking caller.

use crate::pool::ConsumerClass;

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for entropy driver operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No usable slot left in a pool.
    ///
    /// Expected when a byte is generated after the generator was told to stop.
    #[error("Entropy pool is full")]
    PoolFull,

    /// A pool held fewer bytes than requested
    #[error("Insufficient entropy: {unsatisfied} bytes still owed")]
    InsufficientData { unsatisfied: usize },

    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pool geometry rejected at registration
    #[error("Invalid pool: capacity {capacity}, threshold {threshold}")]
    InvalidPool { capacity: usize, threshold: usize },

    /// No pool registered under this id
    #[error("Unknown pool id {0}")]
    UnknownPool(usize),

    /// Pool exists but serves another consumer class
    #[error("Pool {id} serves {actual:?} consumers, expected {expected:?}")]
    WrongClass {
        id: usize,
        expected: ConsumerClass,
        actual: ConsumerClass,
    },
}

impl Error {
    /// Check if error is an expected outcome of normal operation
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::PoolFull | Error::InsufficientData { .. })
    }

    /// Check if error was raised while setting the driver up
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::InvalidPool { .. } | Error::UnknownPool(_) | Error::WrongClass { .. }
        )
    }
}

impl From<envy::Error> for Error {
    fn from(e: envy::Error) -> Self {
        Error::Config(format!("Failed to parse environment variables: {}", e))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(format!("Failed to parse YAML configuration: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_kinds() {
        assert!(Error::PoolFull.is_benign());
        assert!(Error::InsufficientData { unsatisfied: 3 }.is_benign());
        assert!(!Error::Config("bad".to_string()).is_benign());
        assert!(Error::UnknownPool(7).is_config_error());
    }

    #[test]
    fn test_display() {
        let err = Error::InvalidPool { capacity: 1, threshold: 0 };
        assert_eq!(err.to_string(), "Invalid pool: capacity 1, threshold 0");
    }
}
