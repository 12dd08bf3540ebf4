// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Timestamp of a webhook event, either a numeric epoch or a formatted string.
///
/// The value is carried through untouched so the downstream endpoint sees exactly what the
/// sender posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamp {
    Epoch(Number),
    Text(String),
}

/// One decoded webhook event.
///
/// Records are opaque and immutable once decoded: the record is moved, never shared, from
/// intake to the batch that eventually ships it. Fields besides `timestamp` and `event` are
/// kept in `extra` and serialized back inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    timestamp: Timestamp,
    event: Value,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Record {
    #[must_use]
    pub fn new(timestamp: Timestamp, event: Value) -> Self {
        Record {
            timestamp,
            event,
            extra: Map::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_extra(timestamp: Timestamp, event: Value, extra: Map<String, Value>) -> Self {
        Record {
            timestamp,
            event,
            extra,
        }
    }

    /// Decodes a record from the body of an inbound request.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    #[cfg(test)]
    pub(crate) fn timestamp(&self) -> &Timestamp {
        &self.timestamp
    }

    #[cfg(test)]
    pub(crate) fn event(&self) -> &Value {
        &self.event
    }

    #[cfg(test)]
    pub(crate) fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}
