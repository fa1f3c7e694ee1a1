//! Payload truncation
//!
//! Payloads over [`MAX_PAYLOAD_BYTES`] are shrunk in stages until one fits:
//! trim long frame lists, keep only the latest telemetry events, cap string
//! lengths at decreasing limits, then drop frames and telemetry entirely. Each stage works on the JSON tree of the payload.
//! The result is pre-serialized and returned as [`Payload::Raw`].

use crate::error::Result;
use crate::types::Payload;
use serde_json::Value;

/// Size limit for a serialized payload.
pub const MAX_PAYLOAD_BYTES: usize = 512 * 1024;

/// Frames kept at each end of a long trace.
const FRAMES_KEPT: usize = 10;

/// Telemetry events kept, most recent last.
const TELEMETRY_KEPT: usize = 10;

const STRING_LIMITS: [usize; 3] = [1024, 512, 256];

/// Cap for exception messages in the minimal body.
const MIN_BODY_MESSAGE_CHARS: usize = 255;

/// Result of [`truncate`].
#[derive(Debug, Clone)]
pub struct Truncated {
    pub payload: Payload,
    /// Serialized size of `payload` in bytes
    pub size: usize,
    pub truncated: bool,
}

/// Shrink `payload` until its JSON form is at most `max_bytes`.
///
/// Payloads already under the limit come back unchanged. If every stage runs
/// and the payload is still too large, the smallest version is returned and
/// a warning is logged.
pub fn truncate(payload: Payload, max_bytes: usize) -> Result<Truncated> {
    let json = payload.to_json()?;
    if json.len() <= max_bytes {
        return Ok(Truncated {
            size: json.len(),
            payload,
            truncated: false,
        });
    }

    let original_size = json.len();
    let mut tree = payload.to_value()?;
    let mut json = json;

    let stages: [&dyn Fn(&mut Value) -> bool; 6] = [
        &|tree: &mut Value| trim_frames(tree, FRAMES_KEPT),
        &|tree: &mut Value| trim_telemetry(tree, TELEMETRY_KEPT),
        &|tree: &mut Value| cap_strings(tree, STRING_LIMITS[0]),
        &|tree: &mut Value| cap_strings(tree, STRING_LIMITS[1]),
        &|tree: &mut Value| cap_strings(tree, STRING_LIMITS[2]),
        &minimal_body,
    ];

    for stage in stages {
        if !stage(&mut tree) {
            continue;
        }
        json = serde_json::to_string(&tree)?;
        if json.len() <= max_bytes {
            break;
        }
    }

    if json.len() > max_bytes {
        tracing::warn!(
            original_size,
            size = json.len(),
            max_bytes,
            "Payload still exceeds size limit after truncation; sending anyway"
        );
    } else {
        tracing::debug!(original_size, size = json.len(), "Payload truncated");
    }

    Ok(Truncated {
        size: json.len(),
        payload: Payload::Raw(json),
        truncated: true,
    })
}

fn traces_mut(tree: &mut Value) -> Vec<&mut Value> {
    let Some(body) = tree.get_mut("data").and_then(|d| d.get_mut("body")) else {
        return Vec::new();
    };
    if body.get("trace").is_some() {
        return vec![&mut body["trace"]];
    }
    match body.get_mut("trace_chain").and_then(Value::as_array_mut) {
        Some(chain) => chain.iter_mut().collect(),
        None => Vec::new(),
    }
}

/// Keep the first and last `keep` frames of each trace.
fn trim_frames(tree: &mut Value, keep: usize) -> bool {
    let mut changed = false;
    for trace in traces_mut(tree) {
        if let Some(frames) = trace.get_mut("frames").and_then(Value::as_array_mut) {
            if frames.len() > keep * 2 {
                let tail = frames.split_off(frames.len() - keep);
                frames.truncate(keep);
                frames.extend(tail);
                changed = true;
            }
        }
    }
    changed
}

fn telemetry_mut(tree: &mut Value) -> Option<&mut Vec<Value>> {
    tree.get_mut("data")?
        .get_mut("body")?
        .get_mut("telemetry")?
        .as_array_mut()
}

/// Keep the last `keep` telemetry events.
fn trim_telemetry(tree: &mut Value, keep: usize) -> bool {
    match telemetry_mut(tree) {
        Some(events) if events.len() > keep => {
            events.drain(..events.len() - keep);
            true
        }
        _ => false,
    }
}

/// Cap every string in `data` at `max_chars` characters.
fn cap_strings(tree: &mut Value, max_chars: usize) -> bool {
    match tree.get_mut("data") {
        Some(data) => cap_strings_in(data, max_chars),
        None => false,
    }
}

fn cap_strings_in(value: &mut Value, max_chars: usize) -> bool {
    match value {
        Value::String(s) => {
            if let Some((idx, _)) = s.char_indices().nth(max_chars) {
                s.truncate(idx);
                true
            } else {
                false
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |acc, v| cap_strings_in(v, max_chars) | acc),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |acc, v| cap_strings_in(v, max_chars) | acc),
        _ => false,
    }
}

/// Drop all frames and telemetry and cap exception text.
fn minimal_body(tree: &mut Value) -> bool {
    let mut changed = false;
    if let Some(events) = telemetry_mut(tree) {
        changed |= !events.is_empty();
        events.clear();
    }
    for trace in traces_mut(tree) {
        if let Some(frames) = trace.get_mut("frames").and_then(Value::as_array_mut) {
            changed |= !frames.is_empty();
            frames.clear();
        }
        if let Some(exception) = trace.get_mut("exception") {
            for key in ["message", "description"] {
                if let Some(text) = exception.get_mut(key) {
                    changed |= cap_strings_in(text, MIN_BODY_MESSAGE_CHARS);
                }
            }
        }
    }
    changed
}
