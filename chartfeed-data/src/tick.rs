//! Raw tick payloads and normalization into the canonical tick record.
//!
//! The feed and the history endpoint deliver ticks in two shapes: an
//! already-canonical record (`price`, `volume`, `timestamp` fields) and the
//! vendor format, a map of numeric field codes to display strings. Both
//! normalize into [`NormalizedTick`]; ticks with an unusable price are
//! rejected at this boundary and never reach the aggregation pipeline.

use derive_more::Constructor;
use fnv::FnvHashMap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Vendor field codes used by the field-map tick shape.
pub mod field {
    /// Last traded price. May carry a leading direction sign.
    pub const PRICE: &str = "10";
    /// Change rate versus the previous close, signed percentage.
    pub const CHANGE_RATE: &str = "12";
    /// Trade volume for this tick.
    pub const VOLUME: &str = "15";
    /// Session open price.
    pub const OPEN: &str = "16";
    /// Session high price.
    pub const HIGH: &str = "17";
    /// Session low price.
    pub const LOW: &str = "18";
    /// Trade timestamp, unix seconds.
    pub const TIME: &str = "20";
}

/// Canonical tick record every raw shape normalizes into.
///
/// `time` is whole unix seconds, `price` is strictly positive, `volume` is
/// non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Constructor)]
pub struct NormalizedTick {
    pub time: i64,
    pub price: f64,
    pub volume: f64,
}

/// A wire field that may arrive as a JSON number or a display string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawField {
    Num(f64),
    Text(String),
}

impl RawField {
    /// Price semantics: strip a leading direction sign from strings, then
    /// require a finite, strictly positive value.
    fn as_price(&self) -> Option<f64> {
        match self {
            Self::Num(value) => (value.is_finite() && *value > 0.0).then_some(*value),
            Self::Text(raw) => parse_signed_price(raw),
        }
    }

    /// Volume semantics: direction signs are metadata, magnitude is the
    /// volume. Unparsable volume degrades to zero rather than rejecting.
    fn as_volume(&self) -> f64 {
        match self {
            Self::Num(value) if value.is_finite() => value.abs(),
            Self::Num(_) => 0.0,
            Self::Text(raw) => parse_signed_price(raw).unwrap_or(0.0),
        }
    }

    /// Timestamp semantics: truncate to whole seconds.
    fn as_time(&self) -> Option<i64> {
        match self {
            Self::Num(value) => value.is_finite().then_some(*value as i64),
            Self::Text(raw) => raw.trim().parse::<f64>().ok().map(|secs| secs as i64),
        }
    }
}

/// Strip a leading `+`/`-` direction character, then parse. Empty, zero, or
/// non-numeric input yields `None`.
fn parse_signed_price(raw: &str) -> Option<f64> {
    let stripped = raw.trim().trim_start_matches(['+', '-']);
    if stripped.is_empty() {
        return None;
    }
    let value = stripped.parse::<f64>().ok()?;
    (value.is_finite() && value > 0.0).then_some(value)
}

/// Parse a signed rate string, keeping the sign (`"-2.51"` means down 2.51%).
fn parse_signed_rate(raw: &str) -> Option<f64> {
    raw.trim().trim_start_matches('+').parse::<f64>().ok()
}

/// Already-canonical tick shape.
///
/// All fields are lenient: a missing or malformed price surfaces as a
/// normalization rejection, not a deserialization failure of the whole frame.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct CanonicalTick {
    #[serde(default)]
    pub price: Option<RawField>,
    #[serde(default)]
    pub volume: Option<RawField>,
    #[serde(default)]
    pub timestamp: Option<RawField>,
    #[serde(default)]
    pub change_rate: Option<f64>,
    #[serde(default)]
    pub strength: Option<f64>,
    #[serde(default)]
    pub net_buy_volume: Option<f64>,
}

/// Vendor tick shape: numeric field codes mapped to display strings.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct FieldMapTick {
    pub values: FnvHashMap<String, String>,
}

impl FieldMapTick {
    fn field(&self, code: &str) -> Option<&str> {
        self.values.get(code).map(String::as_str)
    }
}

/// A raw tick in either wire shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTick {
    Canonical(CanonicalTick),
    FieldMap(FieldMapTick),
}

impl<'de> Deserialize<'de> for RawTick {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        // The presence of the field-code map is the branch discriminant.
        let has_field_map = value.get("values").is_some_and(Value::is_object);
        if has_field_map {
            serde_json::from_value::<FieldMapTick>(value)
                .map(RawTick::FieldMap)
                .map_err(serde::de::Error::custom)
        } else {
            serde_json::from_value::<CanonicalTick>(value)
                .map(RawTick::Canonical)
                .map_err(serde::de::Error::custom)
        }
    }
}

impl RawTick {
    /// Normalize into the canonical record.
    ///
    /// Returns `None` when the price is missing, zero, or non-numeric; the
    /// caller decides whether to count the drop. `fallback_time` (whole unix
    /// seconds, normally ingestion time) is used when the payload carries no
    /// timestamp.
    pub fn normalize(&self, fallback_time: i64) -> Option<NormalizedTick> {
        match self {
            Self::Canonical(tick) => {
                let price = tick.price.as_ref()?.as_price()?;
                let volume = tick.volume.as_ref().map(RawField::as_volume).unwrap_or(0.0);
                let time = tick
                    .timestamp
                    .as_ref()
                    .and_then(RawField::as_time)
                    .unwrap_or(fallback_time);
                Some(NormalizedTick::new(time, price, volume))
            }
            Self::FieldMap(tick) => {
                let price = parse_signed_price(tick.field(field::PRICE)?)?;
                let volume = tick
                    .field(field::VOLUME)
                    .and_then(parse_signed_price)
                    .unwrap_or(0.0);
                let time = tick
                    .field(field::TIME)
                    .and_then(|raw| raw.trim().parse::<f64>().ok())
                    .map(|secs| secs as i64)
                    .unwrap_or(fallback_time);
                Some(NormalizedTick::new(time, price, volume))
            }
        }
    }

    /// Signed change rate versus previous close, when the payload carries one.
    pub fn change_rate(&self) -> Option<f64> {
        match self {
            Self::Canonical(tick) => tick.change_rate,
            Self::FieldMap(tick) => tick.field(field::CHANGE_RATE).and_then(parse_signed_rate),
        }
    }
}
