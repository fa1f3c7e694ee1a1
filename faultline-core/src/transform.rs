//! Occurrence transformers
//!
//! A transformer is a pure rewriting step over an [`Occurrence`]. A
//! [`TransformerPipeline`] runs its steps left to right and is itself a
//! transformer, so pipelines nest.

use crate::types::Occurrence;
use std::fmt;
use std::sync::Arc;

pub trait Transformer: Send + Sync {
    fn transform(&self, data: Occurrence) -> Occurrence;
}

impl<F> Transformer for F
where
    F: Fn(Occurrence) -> Occurrence + Send + Sync,
{
    fn transform(&self, data: Occurrence) -> Occurrence {
        self(data)
    }
}

/// Ordered sequence of transformers. Empty is the identity.
#[derive(Clone, Default)]
pub struct TransformerPipeline {
    steps: Vec<Arc<dyn Transformer>>,
}

impl TransformerPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step and return the pipeline.
    pub fn with(mut self, step: impl Transformer + 'static) -> Self {
        self.push(step);
        self
    }

    pub fn push(&mut self, step: impl Transformer + 'static) {
        self.steps.push(Arc::new(step));
    }

    pub fn push_shared(&mut self, step: Arc<dyn Transformer>) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Transformer for TransformerPipeline {
    fn transform(&self, data: Occurrence) -> Occurrence {
        self.steps
            .iter()
            .fold(data, |acc, step| step.transform(acc))
    }
}

impl fmt::Debug for TransformerPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerPipeline")
            .field("steps", &self.steps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Body, Level};

    fn occurrence() -> Occurrence {
        Occurrence::new(Level::Error, Body::message("x"))
    }

    fn set_env(data: Occurrence) -> Occurrence {
        Occurrence {
            environment: Some("prod".to_string()),
            ..data
        }
    }

    fn append_title(data: Occurrence) -> Occurrence {
        let title = format!("{}+t", data.title.unwrap_or_default());
        Occurrence {
            title: Some(title),
            ..data
        }
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let pipeline = TransformerPipeline::new();
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.transform(occurrence()), occurrence());
    }

    #[test]
    fn test_steps_run_in_order() {
        let pipeline = TransformerPipeline::new()
            .with(|d: Occurrence| Occurrence {
                title: Some("a".to_string()),
                ..d
            })
            .with(append_title);
        let out = pipeline.transform(occurrence());
        assert_eq!(out.title.as_deref(), Some("a+t"));
    }

    #[test]
    fn test_nesting_matches_flattening() {
        let nested = TransformerPipeline::new()
            .with(set_env)
            .with(TransformerPipeline::new().with(append_title).with(append_title));
        let flat = TransformerPipeline::new()
            .with(set_env)
            .with(append_title)
            .with(append_title);
        assert_eq!(nested.transform(occurrence()), flat.transform(occurrence()));
        assert_eq!(nested.len(), 2);
        assert_eq!(flat.len(), 3);
    }
}
