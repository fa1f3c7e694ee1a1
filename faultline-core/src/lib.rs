//! # faultline-core
//!
//! Core library for faultline, a client-side error and event reporter.
//!
//! This library provides:
//! - The occurrence model and its JSON wire format
//! - Providers, transformers, filters and scrubbing
//! - Fingerprint and UUID generation
//! - Telemetry events that ride along with the next occurrence
//! - A background delivery worker with retry and backoff
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! A report flows through two halves:
//! - **Assembly (caller thread):** providers build a draft, transformers
//!   rewrite it, the scrubber redacts it, generators stamp uuid and
//!   fingerprint, and the payload is serialized.
//! - **Delivery (worker thread):** a bounded drop-oldest queue feeds a single
//!   worker that sends, classifies the response and retries transient
//!   failures with exponential backoff.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use faultline_core::{panic_hook, Notifier};
//!
//! let notifier = Arc::new(
//!     Notifier::builder("POST_SERVER_ITEM_TOKEN")
//!         .environment("production")
//!         .scrub_fields(["password", "*token*"])
//!         .expect("valid scrub patterns")
//!         .build()
//!         .expect("failed to start notifier"),
//! );
//! panic_hook::install(&notifier);
//!
//! notifier.info_message("service started");
//! notifier.flush(Duration::from_secs(2));
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use delivery::{DeliveryListener, DeliveryOptions, DeliveryStats, DropReason};
pub use error::{Error, Result};
pub use error_report::ErrorReport;
pub use filter::{Filter, FilterPipeline, MinimumLevel};
pub use generator::{
    ErrorFingerprint, FieldFingerprint, FingerprintGenerator, RandomUuid, UuidGenerator,
};
pub use notifier::{DefaultLevels, Notifier, NotifierBuilder, Settings};
pub use provider::{request_scope, Provider, Providers};
pub use scrub::{FieldScrubber, Scrubber};
pub use sender::{Ack, FailureKind, HttpSender, SendFailure, SendResult, Sender};
pub use telemetry::TelemetryTracker;
pub use transform::{Transformer, TransformerPipeline};
pub use types::*;

// Public modules
pub mod config;
pub mod delivery;
pub mod error;
pub mod error_report;
pub mod filter;
pub mod generator;
pub mod logging;
pub mod notifier;
pub mod panic_hook;
pub mod provider;
pub mod scrub;
pub mod sender;
pub mod telemetry;
pub mod transform;
pub mod truncate;
pub mod types;
