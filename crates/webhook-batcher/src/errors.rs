// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;
use std::time::Duration;

/// Errors raised while reading configuration at startup. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("Error parsing batch size {value:?}: must be a positive integer")]
    InvalidBatchSize { value: String },

    #[error("Error parsing batch interval {value:?}: {source}")]
    InvalidBatchInterval {
        value: String,
        source: DurationParseError,
    },

    #[error("Invalid post endpoint {value:?}: {reason}")]
    InvalidPostEndpoint { value: String, reason: String },

    #[error("Invalid port {value:?}")]
    InvalidPort { value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration {0:?}")]
    Invalid(String),
    #[error("missing unit in duration {0:?}")]
    MissingUnit(String),
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },
    #[error("duration {0:?} overflows")]
    Overflow(String),
    #[error("duration {0:?} must be positive")]
    NotPositive(String),
}

/// Returned by [`crate::intake::Intake::submit`] once the accumulator has stopped for good.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    #[error("intake is closed, records are no longer accepted")]
    Closed,
}

/// Outcome of a single failed delivery attempt. Always retryable.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("error sending records to post endpoint: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("post endpoint returned non success status code {0}")]
    Status(StatusCode),
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("error marshalling records to send to post endpoint: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unable to send batch of {batch_size} records after {attempts} attempts ({elapsed:?}): {last_error}")]
    RetriesExhausted {
        attempts: u32,
        batch_size: usize,
        elapsed: Duration,
        last_error: AttemptError,
    },
}

/// Terminal errors of the cycle supervisor. Any of these should stop the process.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("delivery of cycle {cycle} failed: {source}")]
    Delivery { cycle: u64, source: DeliveryError },

    #[error("delivery task terminated unexpectedly: {reason}")]
    DeliveryTask { reason: String },
}
