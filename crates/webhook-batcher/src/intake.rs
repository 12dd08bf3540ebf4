// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::errors::IntakeError;
use crate::record::Record;

/// How a submitted record was handed to the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The record is in the intake queue.
    Queued,
    /// The queue was full; a background task will enqueue the record once there is room.
    Deferred,
}

/// Producer side of the intake queue. Cheap to clone, one per request handler.
///
/// Dropping every handle ends the input of the accumulator. Deferred sends hold their own
/// handle, so their records still reach the queue first.
#[derive(Debug, Clone)]
pub struct Intake {
    tx: mpsc::Sender<Record>,
}

/// Creates the intake queue. The receiver belongs to the [`crate::accumulator::Accumulator`].
pub fn channel(capacity: usize) -> (Intake, mpsc::Receiver<Record>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Intake { tx }, rx)
}

impl Intake {
    /// Hands a record to the accumulator without waiting for it to be received.
    ///
    /// Must be called from within a tokio runtime: when the queue is full the send is moved to a
    /// detached task so the caller never waits on the accumulator.
    pub fn submit(&self, record: Record) -> Result<Submission, IntakeError> {
        match self.tx.try_send(record) {
            Ok(()) => Ok(Submission::Queued),
            Err(TrySendError::Full(record)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if tx.send(record).await.is_err() {
                        warn!("Intake closed before a deferred record was queued, record dropped");
                    }
                });
                Ok(Submission::Deferred)
            }
            Err(TrySendError::Closed(_)) => Err(IntakeError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Timestamp;
    use serde_json::{json, Number};

    fn record(n: u64) -> Record {
        Record::new(Timestamp::Epoch(Number::from(n)), json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_submit_queues_record() {
        let (intake, mut rx) = channel(4);
        assert_eq!(intake.submit(record(1)), Ok(Submission::Queued));
        assert_eq!(rx.recv().await, Some(record(1)));
    }

    #[tokio::test]
    async fn test_submit_defers_when_full() {
        let (intake, mut rx) = channel(1);
        assert_eq!(intake.submit(record(1)), Ok(Submission::Queued));
        assert_eq!(intake.submit(record(2)), Ok(Submission::Deferred));

        assert_eq!(rx.recv().await, Some(record(1)));
        assert_eq!(rx.recv().await, Some(record(2)));
    }

    #[tokio::test]
    async fn test_submit_fails_once_closed() {
        let (intake, rx) = channel(4);
        drop(rx);
        assert_eq!(intake.submit(record(1)), Err(IntakeError::Closed));
    }

    #[tokio::test]
    async fn test_deferred_records_outlive_the_intake_handle() {
        let (intake, mut rx) = channel(1);
        intake.submit(record(1)).unwrap();
        assert_eq!(intake.submit(record(2)), Ok(Submission::Deferred));
        assert_eq!(intake.submit(record(3)), Ok(Submission::Deferred));
        drop(intake);

        let mut received = Vec::new();
        while let Some(record) = rx.recv().await {
            received.push(record);
        }
        assert_eq!(received.len(), 3);
        assert_eq!(received[0], record(1));
        assert!(received.contains(&record(2)));
        assert!(received.contains(&record(3)));
    }
}
