// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::accumulator::{Accumulator, Flush};
use crate::errors::{DeliveryError, SupervisorError};
use crate::forwarder::{BatchForwarder, DeliveryReport};

type DeliveryOutcome = (u64, Result<DeliveryReport, DeliveryError>);

/// Drives the accumulator one cycle after another and hands every non-empty batch to the
/// forwarder.
///
/// Deliveries run in their own tasks, so the next cycle accumulates while the previous batch is
/// still being posted. Delivery order across batches is therefore best-effort.
pub struct Supervisor {
    accumulator: Accumulator,
    forwarder: Arc<dyn BatchForwarder + Send + Sync>,
    deliveries: JoinSet<DeliveryOutcome>,
}

impl Supervisor {
    pub fn new(accumulator: Accumulator, forwarder: Arc<dyn BatchForwarder + Send + Sync>) -> Self {
        Supervisor {
            accumulator,
            forwarder,
            deliveries: JoinSet::new(),
        }
    }

    /// Runs until every [`crate::intake::Intake`] handle is dropped and every accepted record is
    /// delivered, or until a delivery fails for good.
    ///
    /// Dropping the intake handles is the graceful shutdown: records still waiting for room in
    /// the queue hold a handle of their own, so they are flushed before the last cycle ends.
    ///
    /// On a failed delivery the intake is closed, records not yet flushed are dropped, other
    /// in-flight deliveries are awaited and the error is returned. The caller is expected to stop
    /// the process.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        debug!("Cycle supervisor started");

        loop {
            tokio::select! {
                biased;
                finished = join_next_delivery(&mut self.deliveries) => {
                    if let Err(e) = Self::on_delivery_finished(finished) {
                        return self.fail(e).await;
                    }
                }
                flush = self.accumulator.next_flush() => match flush {
                    Some(flush) => self.dispatch(flush),
                    None => break,
                },
            }
        }

        while let Some(finished) = self.deliveries.join_next().await {
            if let Err(e) = Self::on_delivery_finished(finished) {
                return self.fail(e).await;
            }
        }
        debug!("Cycle supervisor stopped");
        Ok(())
    }

    fn dispatch(&mut self, flush: Flush) {
        let Flush { batch, trigger } = flush;
        let cycle = batch.cycle();
        info!(
            cycle,
            batch_size = batch.len(),
            %trigger,
            "Received a new batch to process"
        );
        if batch.is_empty() {
            debug!(cycle, "Empty batch, skipping delivery");
            return;
        }

        let forwarder = Arc::clone(&self.forwarder);
        self.deliveries
            .spawn(async move { (cycle, forwarder.deliver(batch).await) });
    }

    fn on_delivery_finished(
        finished: Result<DeliveryOutcome, JoinError>,
    ) -> Result<(), SupervisorError> {
        match finished {
            Ok((cycle, Ok(report))) => {
                debug!(
                    cycle,
                    attempts = report.attempts.len(),
                    delivery_duration = ?report.elapsed,
                    "Batch delivered"
                );
                Ok(())
            }
            Ok((cycle, Err(source))) => Err(SupervisorError::Delivery { cycle, source }),
            Err(e) => Err(SupervisorError::DeliveryTask {
                reason: e.to_string(),
            }),
        }
    }

    async fn fail(mut self, err: SupervisorError) -> Result<(), SupervisorError> {
        error!(error = %err, "Unable to deliver a batch. Stopping intake");
        let abandoned = self.accumulator.abandon();
        if abandoned > 0 {
            warn!(abandoned_records = abandoned, "Discarding records not yet flushed");
        }

        while let Some(finished) = self.deliveries.join_next().await {
            if let Err(other) = Self::on_delivery_finished(finished) {
                error!(error = %other, "In-flight delivery failed while stopping");
            }
        }
        Err(err)
    }
}

async fn join_next_delivery(
    deliveries: &mut JoinSet<DeliveryOutcome>,
) -> Result<DeliveryOutcome, JoinError> {
    match deliveries.join_next().await {
        Some(finished) => finished,
        None => std::future::pending().await,
    }
}
