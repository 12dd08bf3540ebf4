// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batch accumulation, one cycle at a time.
//!
//! A cycle starts with an empty batch and an armed deadline. It ends with exactly one flush:
//! either the batch reached `batch_size` records, or `batch_interval` elapsed. The next cycle is
//! started before the flushed batch is returned, so the intake queue always has a live cycle
//! draining it.

use std::fmt;
use std::mem;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::config::Config;
use crate::record::Record;

/// Why a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The batch reached the configured size.
    Size,
    /// The batch interval elapsed.
    Interval,
    /// Every intake handle was dropped and the queue fully drained.
    Shutdown,
}

impl fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Interval => "interval",
            FlushTrigger::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Records of one cycle, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    cycle: u64,
    records: Vec<Record>,
}

impl Batch {
    pub fn new(cycle: u64, records: Vec<Record>) -> Self {
        Batch { cycle, records }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A terminated cycle: its batch and what ended it.
#[derive(Debug)]
pub struct Flush {
    pub batch: Batch,
    pub trigger: FlushTrigger,
}

#[derive(Debug)]
struct Cycle {
    id: u64,
    records: Vec<Record>,
    deadline: Instant,
}

impl Cycle {
    fn start(id: u64, batch_size: usize, batch_interval: Duration) -> Self {
        info!(
            cycle = id,
            batch_size,
            batch_interval = ?batch_interval,
            "starting new batch cycle"
        );
        Cycle {
            id,
            // Interval-triggered flushes are often partial, cap the upfront allocation.
            records: Vec::with_capacity(batch_size.min(1024)),
            deadline: Instant::now() + batch_interval,
        }
    }

    fn flush(self, trigger: FlushTrigger) -> Flush {
        Flush {
            batch: Batch::new(self.id, self.records),
            trigger,
        }
    }
}

/// Consumer side of the intake queue.
///
/// All in-flight state lives here rather than in the future returned by
/// [`Accumulator::next_flush`], so dropping that future (for instance when it loses a
/// `tokio::select!`) never loses a record.
#[derive(Debug)]
pub struct Accumulator {
    rx: mpsc::Receiver<Record>,
    batch_size: usize,
    batch_interval: Duration,
    cycle: Option<Cycle>,
    next_cycle_id: u64,
}

impl Accumulator {
    /// Creates the accumulator and starts its first cycle.
    pub fn new(rx: mpsc::Receiver<Record>, batch_size: usize, batch_interval: Duration) -> Self {
        let batch_size = batch_size.max(1);
        Accumulator {
            rx,
            batch_size,
            batch_interval,
            cycle: Some(Cycle::start(1, batch_size, batch_interval)),
            next_cycle_id: 2,
        }
    }

    pub fn from_config(rx: mpsc::Receiver<Record>, config: &Config) -> Self {
        Self::new(rx, config.batch_size, config.batch_interval)
    }

    #[cfg(test)]
    fn cycle_id(&self) -> Option<u64> {
        self.cycle.as_ref().map(|cycle| cycle.id)
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.cycle.as_ref().map_or(0, |cycle| cycle.records.len())
    }

    /// Closes the intake and drops every record not yet flushed. Returns how many were dropped.
    pub fn abandon(&mut self) -> usize {
        self.rx.close();
        let mut dropped = self.cycle.take().map_or(0, |cycle| cycle.records.len());
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Waits for the live cycle to end and returns its flush.
    ///
    /// The next cycle is already running when this returns. Once every intake handle is dropped,
    /// the records left in the queue are flushed with [`FlushTrigger::Shutdown`] and later calls
    /// return `None`.
    pub async fn next_flush(&mut self) -> Option<Flush> {
        loop {
            let deadline = self.cycle.as_ref()?.deadline;

            tokio::select! {
                biased;
                () = sleep_until(deadline) => {
                    info!("Batch interval elapsed. Processing the batch");
                    return Some(self.rotate(FlushTrigger::Interval));
                }
                maybe_record = self.rx.recv() => match maybe_record {
                    Some(record) => {
                        let current_batch_size = self.push(record);
                        debug!(current_batch_size, "payload added to batch");
                        if current_batch_size >= self.batch_size {
                            info!("Batch size reached. Processing the batch");
                            return Some(self.rotate(FlushTrigger::Size));
                        }
                    }
                    None => {
                        let cycle = self.cycle.take()?;
                        info!(cycle = cycle.id, "Intake closed. Processing the last batch");
                        return Some(cycle.flush(FlushTrigger::Shutdown));
                    }
                },
            }
        }
    }

    fn push(&mut self, record: Record) -> usize {
        match self.cycle.as_mut() {
            Some(cycle) => {
                cycle.records.push(record);
                cycle.records.len()
            }
            None => 0,
        }
    }

    fn rotate(&mut self, trigger: FlushTrigger) -> Flush {
        let next = Cycle::start(self.next_cycle_id, self.batch_size, self.batch_interval);
        self.next_cycle_id += 1;
        match mem::replace(&mut self.cycle, Some(next)) {
            Some(finished) => finished.flush(trigger),
            None => Flush {
                batch: Batch::new(0, Vec::new()),
                trigger,
            },
        }
    }
}
