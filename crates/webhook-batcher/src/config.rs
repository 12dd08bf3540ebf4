// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::Url;
use std::env;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::util::parse_duration;

pub const BATCH_SIZE_ENV: &str = "BATCH_SIZE";
pub const BATCH_INTERVAL_ENV: &str = "BATCH_INTERVAL";
pub const POST_ENDPOINT_ENV: &str = "POST_ENDPOINT";
pub const PORT_ENV: &str = "PORT";

const DEFAULT_PORT: u16 = 8080;
pub const MAX_DELIVERY_ATTEMPTS: u32 = 3;
pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const INTAKE_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// records per batch before a size-triggered flush
    pub batch_size: usize,
    /// longest a cycle accumulates before a time-triggered flush
    pub batch_interval: Duration,
    pub post_endpoint: Url,
    pub port: u16,
    /// attempts per batch, including the first one
    pub max_delivery_attempts: u32,
    /// fixed delay between two delivery attempts
    pub retry_backoff: Duration,
    /// timeout of each POST to the downstream endpoint
    pub request_timeout: Duration,
    pub intake_queue_capacity: usize,
    pub max_request_content_length: usize,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn new() -> Result<Config, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let batch_size_raw = lookup(BATCH_SIZE_ENV).ok_or(ConfigError::Missing(BATCH_SIZE_ENV))?;
        let batch_size = batch_size_raw
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| ConfigError::InvalidBatchSize {
                value: batch_size_raw.clone(),
            })?;

        let batch_interval_raw =
            lookup(BATCH_INTERVAL_ENV).ok_or(ConfigError::Missing(BATCH_INTERVAL_ENV))?;
        let batch_interval = parse_duration(batch_interval_raw.trim()).map_err(|source| {
            ConfigError::InvalidBatchInterval {
                value: batch_interval_raw.clone(),
                source,
            }
        })?;

        let post_endpoint_raw =
            lookup(POST_ENDPOINT_ENV).ok_or(ConfigError::Missing(POST_ENDPOINT_ENV))?;
        let post_endpoint = parse_post_endpoint(&post_endpoint_raw)?;

        let port = match lookup(PORT_ENV) {
            Some(port) => port
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort { value: port })?,
            None => DEFAULT_PORT,
        };

        Ok(Config {
            batch_size,
            batch_interval,
            post_endpoint,
            port,
            max_delivery_attempts: MAX_DELIVERY_ATTEMPTS,
            retry_backoff: RETRY_BACKOFF,
            request_timeout: REQUEST_TIMEOUT,
            intake_queue_capacity: INTAKE_QUEUE_CAPACITY,
            max_request_content_length: 10 * 1024 * 1024, // 10MB in Bytes
        })
    }
}

fn parse_post_endpoint(value: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidPostEndpoint {
        value: value.to_string(),
        reason,
    };
    let url = Url::parse(value.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {}", url.scheme())));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(url)
}
