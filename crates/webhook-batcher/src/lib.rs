// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Receives webhook log events over HTTP, accumulates them in memory and forwards them to a
//! downstream endpoint in batches.
//!
//! ```text
//!   POST /log ──> Intake ──(bounded queue)──> Accumulator ──> Supervisor ──> Forwarder
//!                                              (size|timer)    (next cycle)   (retry + backoff)
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod config;
pub mod errors;
pub mod forwarder;
pub mod http_utils;
pub mod intake;
pub mod record;
pub mod server;
pub mod supervisor;
pub mod util;
