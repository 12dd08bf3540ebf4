// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of flushed batches to the downstream endpoint.
//!
//! A batch is serialized once as a JSON array and POSTed up to `max_attempts` times, with a fixed
//! `backoff` between attempts. Any 2xx status is a success; other statuses and transport errors
//! are retried. Exhausting every attempt is terminal and reported to the caller.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, StatusCode, Url};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::accumulator::Batch;
use crate::config::Config;
use crate::errors::{AttemptError, DeliveryError};
use crate::http_utils::build_client;

#[async_trait]
pub trait BatchForwarder {
    /// Delivers a non-empty batch downstream, retrying transient failures.
    async fn deliver(&self, batch: Batch) -> Result<DeliveryReport, DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Delivered(StatusCode),
    Failed(String),
}

/// One POST of a batch. Only used for reporting.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    /// 1-based
    pub number: u32,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub cycle: u64,
    pub batch_size: usize,
    pub attempts: Vec<DeliveryAttempt>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    endpoint: Url,
    max_attempts: u32,
    backoff: Duration,
}

impl HttpForwarder {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = build_client(config.request_timeout)?;
        Ok(Self::with_client(
            client,
            config.post_endpoint.clone(),
            config.max_delivery_attempts,
            config.retry_backoff,
        ))
    }

    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        endpoint: Url,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        HttpForwarder {
            client,
            endpoint,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    async fn send(&self, payload: Bytes) -> Result<StatusCode, AttemptError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(status)
        } else {
            Err(AttemptError::Status(status))
        }
    }
}

#[async_trait]
impl BatchForwarder for HttpForwarder {
    async fn deliver(&self, batch: Batch) -> Result<DeliveryReport, DeliveryError> {
        let cycle = batch.cycle();
        let batch_size = batch.len();
        let payload = match serde_json::to_vec(batch.records()) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                error!(cycle, batch_size, error = %e, "error marshalling records to send to post endpoint");
                return Err(DeliveryError::Serialization(e));
            }
        };

        let started = Instant::now();
        let mut attempts = Vec::with_capacity(self.max_attempts as usize);
        let mut number = 0;

        loop {
            number += 1;
            let time = Instant::now();
            let result = self.send(payload.clone()).await;
            let elapsed = time.elapsed();

            match result {
                Ok(status) => {
                    info!(
                        cycle,
                        status_code = status.as_u16(),
                        post_duration = ?elapsed,
                        batch_size,
                        "Batch post succeeded"
                    );
                    attempts.push(DeliveryAttempt {
                        number,
                        outcome: AttemptOutcome::Delivered(status),
                        elapsed,
                    });
                    return Ok(DeliveryReport {
                        cycle,
                        batch_size,
                        attempts,
                        elapsed: started.elapsed(),
                    });
                }
                Err(e) => {
                    attempts.push(DeliveryAttempt {
                        number,
                        outcome: AttemptOutcome::Failed(e.to_string()),
                        elapsed,
                    });
                    if number >= self.max_attempts {
                        error!(
                            cycle,
                            retry_counter = number,
                            post_duration = ?elapsed,
                            batch_size,
                            error = %e,
                            "Unable to send the batch to post endpoint after maximum retries"
                        );
                        return Err(DeliveryError::RetriesExhausted {
                            attempts: number,
                            batch_size,
                            elapsed: started.elapsed(),
                            last_error: e,
                        });
                    }
                    warn!(
                        cycle,
                        retry_counter = number,
                        post_duration = ?elapsed,
                        batch_size,
                        error = %e,
                        "Sending batch to post endpoint failed. Retrying after {:?}",
                        self.backoff
                    );
                }
            }
            tokio::time::sleep(self.backoff).await;
        }
    }
}
