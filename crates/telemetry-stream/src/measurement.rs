// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Measurement model.
//!
//! A [`Measurement`] is the pipeline's unit of work: one projected value
//! with its identity and event time. The value is carried as a
//! `serde_json::Value`, built with `arbitrary_precision` so that numeric
//! literals keep their original decimal text from parser to sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scales beyond this are past f64 precision; rounding is skipped.
const MAX_ROUNDING_SCALE: u32 = 15;

/// One projected, typed telemetry value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    pub measurement_type: String,
    pub timestamp: DateTime<Utc>,
    pub value: Value,
}

impl Measurement {
    pub fn new(
        source_id: impl Into<String>,
        node_name: Option<String>,
        measurement_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: Value,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            node_name,
            measurement_type: measurement_type.into(),
            timestamp,
            value,
        }
    }

    /// Key of the aggregation window this measurement belongs to.
    pub fn aggregation_key(&self) -> AggregationKey {
        AggregationKey {
            source_id: self.source_id.clone(),
            node_name: self.node_name.clone(),
            measurement_type: self.measurement_type.clone(),
        }
    }
}

/// Identity of one independent aggregation window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    pub source_id: String,
    pub node_name: Option<String>,
    pub measurement_type: String,
}

impl std::fmt::Display for AggregationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.source_id,
            self.node_name.as_deref().unwrap_or("-"),
            self.measurement_type
        )
    }
}

/// A numeric sample extracted from a measurement value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericSample {
    pub value: f64,
    /// Decimal places of the literal text.
    pub scale: u32,
}

/// Extract a foldable numeric sample.
///
/// Numbers and strings parseable as finite floats qualify; the scale is
/// taken from the literal text, so `"1.20"` has scale 2.
pub fn numeric_sample(value: &Value) -> Option<NumericSample> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };

    let parsed: f64 = text.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }

    Some(NumericSample {
        value: parsed,
        scale: decimal_scale(&text),
    })
}

/// Number of decimal places in a numeric literal.
///
/// Exponents shift the count: `1.5e-2` has scale 3, `1.25e1` has scale 1.
pub fn decimal_scale(literal: &str) -> u32 {
    let literal = literal.trim();
    let (mantissa, exponent) = match literal.find(['e', 'E']) {
        Some(pos) => (
            &literal[..pos],
            literal[pos + 1..].parse::<i64>().unwrap_or(0),
        ),
        None => (literal, 0),
    };

    let fraction_digits = mantissa
        .split_once('.')
        .map(|(_, frac)| frac.chars().take_while(|c| c.is_ascii_digit()).count())
        .unwrap_or(0) as i64;

    (fraction_digits - exponent).clamp(0, u32::MAX as i64) as u32
}

/// Round to `scale` decimal places, halves away from zero.
///
/// Rounding works on the shortest decimal form of `value` (15 significant
/// digits), so `1.005` rounds to `1.01` even though its binary value is
/// slightly below the half.
pub fn round_half_away_from_zero(value: f64, scale: u32) -> f64 {
    if scale > MAX_ROUNDING_SCALE {
        return value;
    }
    match rounded_text(value, scale) {
        Some(text) => text.parse().unwrap_or(value),
        None => {
            let factor = 10f64.powi(scale as i32);
            (value * factor).round() / factor
        }
    }
}

/// Decimal text of `value` rounded half away from zero, with exactly
/// `scale` fraction digits.
///
/// Returns `None` for magnitudes the integer digit buffer cannot hold.
fn rounded_text(value: f64, scale: u32) -> Option<String> {
    if !value.is_finite() || value.abs() >= 1e20 {
        return None;
    }

    // d.dddddddddddddde<exp>
    let sci = format!("{:.14e}", value.abs());
    let (mantissa, exponent) = sci.split_once('e')?;
    let exponent: i64 = exponent.parse().ok()?;
    let digits: Vec<u32> = mantissa.chars().filter_map(|c| c.to_digit(10)).collect();

    // digits kept up to the requested fraction position
    let keep = exponent + 1 + i64::from(scale);
    let scaled: u128 = if keep <= 0 {
        u128::from(keep == 0 && digits.first().is_some_and(|d| *d >= 5))
    } else {
        let keep = keep as usize;
        let mut n: u128 = 0;
        for i in 0..keep {
            n = n.checked_mul(10)? + u128::from(digits.get(i).copied().unwrap_or(0));
        }
        if digits.get(keep).is_some_and(|d| *d >= 5) {
            n += 1;
        }
        n
    };

    let mut text = scaled.to_string();
    let scale = scale as usize;
    if text.len() <= scale {
        text = format!("{}{}", "0".repeat(scale + 1 - text.len()), text);
    }
    if scale > 0 {
        text.insert(text.len() - scale, '.');
    }
    if value.is_sign_negative() && scaled != 0 {
        text.insert(0, '-');
    }
    Some(text)
}

/// Build a JSON number rounded to `scale` places whose text carries
/// exactly `scale` decimals (`1.20` rather than `1.2`).
pub fn scaled_number(value: f64, scale: Option<u32>) -> Value {
    let Some(scale) = scale else {
        return serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    };

    let text = if scale > MAX_ROUNDING_SCALE {
        None
    } else {
        rounded_text(value, scale)
    };
    let text = text.unwrap_or_else(|| {
        format!(
            "{:.*}",
            scale as usize,
            round_half_away_from_zero(value, scale)
        )
    });
    match serde_json::from_str::<serde_json::Number>(&text) {
        Ok(number) => Value::Number(number),
        Err(_) => serde_json::Number::from_f64(round_half_away_from_zero(value, scale))
            .map(Value::Number)
            .unwrap_or(Value::Null),
    }
}
