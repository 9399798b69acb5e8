//! JSON wire codec for CDC events

use super::model::StreamsTransactionEvent;
use super::{EventError, EventResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::BufRead;

pub fn to_json_string<T: Serialize + ?Sized>(value: &T) -> EventResult<String> {
    Ok(serde_json::to_string(value)?)
}

pub fn to_json_bytes<T: Serialize + ?Sized>(value: &T) -> EventResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a value; unknown fields are ignored
pub fn from_json_slice<T: DeserializeOwned>(bytes: &[u8]) -> EventResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn from_json_str<T: DeserializeOwned>(s: &str) -> EventResult<T> {
    Ok(serde_json::from_str(s)?)
}

/// Read newline-delimited events; blank lines are skipped.
///
/// Fails on the first malformed line, reporting its 1-based number.
pub fn read_json_lines<R: BufRead>(reader: R) -> EventResult<Vec<StreamsTransactionEvent>> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|source| EventError::Line {
            line: index + 1,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}
