use chrono::{DateTime, TimeZone};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Field carrying the miner's identifier; required on every datagram.
///
/// The value must be a non-empty JSON string and is used verbatim as the map
/// key. Numbers, booleans and other JSON types are rejected even when
/// non-zero.
pub const SOURCE_ID_FIELD: &str = "ip";

/// Field added by the listener with the local receipt time.
pub const RECEIVED_AT_FIELD: &str = "UpdateTime";

pub const FIRMWARE_VERSION_FIELD: &str = "Version";

pub const HASHRATE_FIELD: &str = "HashRate";

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Latest report of one miner: the datagram's fields, passed through
/// unmodified, plus the receipt timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct MinerRecord {
    source_id: String,
    fields: Map<String, Value>,
}

impl MinerRecord {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Local receipt time, formatted with [`TIMESTAMP_FORMAT`].
    pub fn received_at(&self) -> Option<&str> {
        self.fields.get(RECEIVED_AT_FIELD).and_then(Value::as_str)
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.fields.get(FIRMWARE_VERSION_FIELD).and_then(Value::as_str)
    }

    /// Reported hashrate in hashes per second, when present and readable.
    pub fn hashrate(&self) -> Option<f64> {
        self.fields
            .get(HASHRATE_FIELD)
            .and_then(Value::as_str)
            .and_then(super::hashrate::parse_hashrate)
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

impl Serialize for MinerRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

/// Reasons a datagram is discarded.
#[derive(Debug)]
pub enum DecodeError {
    Malformed(serde_json::Error),
    NotAnObject,
    MissingSourceId,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(err) => write!(f, "datagram is not valid JSON: {err}"),
            DecodeError::NotAnObject => write!(f, "datagram is not a JSON object"),
            DecodeError::MissingSourceId => {
                write!(f, "datagram has no '{SOURCE_ID_FIELD}' field")
            }
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Malformed(err) => Some(err),
            _ => None,
        }
    }
}

/// Decodes one datagram into a record stamped with `received_at`.
///
/// The identifier must be a non-empty string; it is not trimmed, so the key
/// always matches the stored field.
pub fn decode_datagram<Tz>(raw: &[u8], received_at: &DateTime<Tz>) -> Result<MinerRecord, DecodeError>
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let value: Value = serde_json::from_slice(raw).map_err(DecodeError::Malformed)?;
    let Value::Object(mut fields) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let source_id = fields
        .get(SOURCE_ID_FIELD)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or(DecodeError::MissingSourceId)?
        .to_owned();

    fields.insert(
        RECEIVED_AT_FIELD.to_owned(),
        Value::String(received_at.format(TIMESTAMP_FORMAT).to_string()),
    );

    Ok(MinerRecord { source_id, fields })
}
