//! Fingerprint and UUID generation
//!
//! The fingerprint groups occurrences that describe the same logical issue.
//! The UUID identifies a single occurrence and is independent of it.

use crate::types::{BodyContent, Occurrence};
use sha2::{Digest, Sha256};

pub trait FingerprintGenerator: Send + Sync {
    /// Must be deterministic and never empty.
    fn generate(&self, data: &Occurrence) -> String;
}

pub trait UuidGenerator: Send + Sync {
    fn generate(&self, data: &Occurrence) -> String;
}

/// Hashes the error class and the most recent application frame, or the
/// message text for message bodies. Line numbers are left out so that edits
/// elsewhere in a file do not split a group.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorFingerprint;

impl FingerprintGenerator for ErrorFingerprint {
    fn generate(&self, data: &Occurrence) -> String {
        let mut hasher = Sha256::new();
        match &data.body.content {
            BodyContent::Message(message) => {
                hasher.update(b"message\0");
                hasher.update(message.body.as_bytes());
            }
            _ => {
                if let Some(trace) = data.body.primary_trace() {
                    hasher.update(b"trace\0");
                    hasher.update(trace.exception.class_name.as_bytes());
                    let frame = trace
                        .frames
                        .iter()
                        .rev()
                        .find(|f| f.is_in_app())
                        .or_else(|| trace.top_frame());
                    if let Some(frame) = frame {
                        hasher.update(b"\0");
                        hasher.update(frame.method.as_deref().unwrap_or("").as_bytes());
                        hasher.update(b"@");
                        hasher.update(frame.filename.as_bytes());
                    }
                } else {
                    // Empty trace chain
                    hasher.update(b"empty\0");
                }
            }
        }
        hex::encode(hasher.finalize())
    }
}

/// Hashes the values at a fixed list of dotted occurrence paths, e.g.
/// `["context", "custom.tenant"]`. Missing paths hash as null.
#[derive(Debug, Clone)]
pub struct FieldFingerprint {
    fields: Vec<String>,
}

impl FieldFingerprint {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl FingerprintGenerator for FieldFingerprint {
    fn generate(&self, data: &Occurrence) -> String {
        let tree = match serde_json::to_value(data) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to error fingerprint");
                return ErrorFingerprint.generate(data);
            }
        };

        let mut hasher = Sha256::new();
        for field in &self.fields {
            let value = field
                .split('.')
                .try_fold(&tree, |node, key| node.get(key))
                .unwrap_or(&serde_json::Value::Null);
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b"\0");
        }
        hex::encode(hasher.finalize())
    }
}

/// Random version 4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomUuid;

impl UuidGenerator for RandomUuid {
    fn generate(&self, _data: &Occurrence) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}
