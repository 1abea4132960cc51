// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record parsing and interest projection.
//!
//! Maps one JSON record to zero or more [`Measurement`]s based on the
//! configured interest rules.
//!
//! ```text
//! raw bytes --> ParsedRecord --> (rule 1, rule 2, ...) --> Measurement*
//! ```
//!
//! Recognized record fields: `source`, `nodeName` (falling back to a
//! decoded `nodeId`, then the routing key, then `"unknown"`),
//! `timestamp_iso` / `timestamp` (ISO-8601), and `value`. When `value` is
//! absent the whole record is the value.
//!
//! Records without a parseable timestamp are stamped with the ingestion
//! wall-clock time. Late or replayed records are therefore attributed to
//! the moment they were read, not to when they happened.

use crate::config::InterestRule;
use crate::measurement::Measurement;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use std::iter::FusedIterator;

const UNKNOWN: &str = "unknown";

/// Stateless record-to-measurement projector.
#[derive(Debug, Clone, Default)]
pub struct Projector {
    interests: Vec<InterestRule>,
}

impl Projector {
    /// Create a projector for the given interest rules.
    pub fn new(interests: Vec<InterestRule>) -> Self {
        Self { interests }
    }

    /// Configured interest rules.
    pub fn interests(&self) -> &[InterestRule] {
        &self.interests
    }

    /// Project a raw payload into measurements.
    ///
    /// The returned iterator is lazy and yields one measurement per
    /// matching rule. Empty payloads, malformed JSON and a missing rule set
    /// all produce an empty projection; nothing here is an error.
    pub fn project<'a>(&'a self, payload: &[u8], routing_key: Option<&str>) -> Projection<'a> {
        if self.interests.is_empty() {
            tracing::debug!("No interest rules configured, skipping record");
            return Projection::empty();
        }

        match parse_record(payload, routing_key) {
            Some(record) => Projection {
                rules: self.interests.iter(),
                record: Some(record),
            },
            None => Projection::empty(),
        }
    }
}

/// Identity, time and value extracted from one record.
#[derive(Debug, Clone)]
struct ParsedRecord {
    source: String,
    node_name: String,
    timestamp: DateTime<Utc>,
    value: Value,
}

impl ParsedRecord {
    fn matches(&self, rule: &InterestRule) -> bool {
        eq_ignore_case(&rule.source, &self.source)
            && eq_ignore_case(&rule.node_name, &self.node_name)
    }

    fn measurement(&self, measurement_type: &str, value: Value) -> Measurement {
        Measurement::new(
            self.source.clone(),
            Some(self.node_name.clone()),
            measurement_type,
            self.timestamp,
            value,
        )
    }
}

/// Lazy sequence of measurements projected from one record.
///
/// Consumed once; not restartable.
pub struct Projection<'a> {
    rules: std::slice::Iter<'a, InterestRule>,
    record: Option<ParsedRecord>,
}

impl<'a> Projection<'a> {
    fn empty() -> Self {
        let rules: &'a [InterestRule] = &[];
        Self {
            rules: rules.iter(),
            record: None,
        }
    }
}

impl Iterator for Projection<'_> {
    type Item = Measurement;

    fn next(&mut self) -> Option<Measurement> {
        let record = self.record.as_ref()?;

        for rule in self.rules.by_ref() {
            if !record.matches(rule) {
                continue;
            }

            match rule.measurement_key() {
                None => return Some(record.measurement(&rule.node_name, record.value.clone())),
                Some(key) => match record.value.get(key) {
                    Some(field) => return Some(record.measurement(key, field.clone())),
                    None => {
                        tracing::debug!(
                            source = %record.source,
                            node_name = %record.node_name,
                            measurement_key = key,
                            "Record has no field for interest, skipping rule"
                        );
                    }
                },
            }
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.record {
            Some(_) => (0, Some(self.rules.len())),
            None => (0, Some(0)),
        }
    }
}

impl FusedIterator for Projection<'_> {}

fn parse_record(payload: &[u8], routing_key: Option<&str>) -> Option<ParsedRecord> {
    let text = match std::str::from_utf8(payload) {
        Ok(text) => text,
        Err(err) => {
            tracing::warn!("Skipping record with invalid UTF-8: {}", err);
            return None;
        }
    };

    if text.trim().is_empty() {
        tracing::debug!("Skipping empty record");
        return None;
    }

    let json: Value = match serde_json::from_str(text) {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!("Skipping malformed record: {}", err);
            return None;
        }
    };

    let Value::Object(mut fields) = json else {
        tracing::warn!("Skipping record that is not a JSON object");
        return None;
    };

    let source = string_field(&fields, "source")
        .unwrap_or(UNKNOWN)
        .to_string();

    let node_name = string_field(&fields, "nodeName")
        .map(str::to_string)
        .or_else(|| string_field(&fields, "nodeId").map(decode_node_id))
        .or_else(|| {
            routing_key
                .filter(|key| !key.trim().is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| UNKNOWN.to_string());

    let timestamp = ["timestamp_iso", "timestamp"]
        .iter()
        .find_map(|name| string_field(&fields, name).and_then(parse_timestamp))
        .unwrap_or_else(Utc::now);

    let value = match fields.remove("value") {
        Some(value) => value,
        None => Value::Object(fields),
    };

    Some(ParsedRecord {
        source,
        node_name,
        timestamp,
        value,
    })
}

fn string_field<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Decode an OPC-UA style node id (`ns=2;s=Boiler.Temp`) to its identifier.
///
/// Anything that does not look like one is returned unchanged.
fn decode_node_id(raw: &str) -> String {
    let tail = if raw.starts_with("ns=") {
        raw.split_once(';').map(|(_, tail)| tail).unwrap_or(raw)
    } else {
        raw
    };

    match tail.split_once('=') {
        Some((kind, ident)) if matches!(kind, "i" | "s" | "g" | "b") && !ident.is_empty() => {
            ident.to_string()
        }
        _ => raw.to_string(),
    }
}

/// Parse an ISO-8601 instant. Offset-less values are taken as UTC.
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || a.to_lowercase() == b.to_lowercase()
}
