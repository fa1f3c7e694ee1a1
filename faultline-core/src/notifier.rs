//! Occurrence assembly and the public reporting API
//!
//! [`Notifier`] is the single synchronous entry point. A call to
//! [`Notifier::log`] takes a snapshot of the current [`Settings`] and runs:
//!
//! 1. pre-filter on the raw arguments
//! 2. providers build a draft occurrence and buffered telemetry is attached
//! 3. the transformer pipeline rewrites it
//! 4. the scrubber redacts it
//! 5. uuid and fingerprint are generated
//! 6. post-filter on the finished occurrence
//! 7. the payload is serialized (and truncated if oversized)
//! 8. the payload is queued for the delivery worker
//!
//! Reporting never panics into the host and never returns an error. Every
//! user-supplied stage runs under `catch_unwind`; failures are logged through
//! `tracing` and the occurrence proceeds with what is available.

use std::cell::Cell;
use std::error::Error as StdError;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::{Map, Value};

use crate::config::Config;
use crate::delivery::{DeliveryListener, DeliveryOptions, DeliveryStats, DeliveryWorker};
use crate::error::{Error, Result};
use crate::error_report::ErrorReport;
use crate::filter::{Filter, FilterPipeline};
use crate::generator::{
    ErrorFingerprint, FieldFingerprint, FingerprintGenerator, RandomUuid, UuidGenerator,
};
use crate::provider::{Provider, Providers};
use crate::scrub::{FieldScrubber, Scrubber};
use crate::sender::{HttpSender, Sender};
use crate::telemetry::{self, TelemetryTracker};
use crate::transform::{Transformer, TransformerPipeline};
use crate::truncate::{self, MAX_PAYLOAD_BYTES};
use crate::types::{
    Body, Level, Occurrence, Payload, PersonInfo, RequestInfo, ServerInfo, TelemetryEvent,
    TelemetrySource,
};

/// Value of the `language` attribute.
pub const LANGUAGE: &str = "rust";

thread_local! {
    static REPORTING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as assembling an occurrence.
struct ReportingGuard;

impl ReportingGuard {
    fn enter() -> Option<Self> {
        REPORTING.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(ReportingGuard)
            }
        })
    }
}

impl Drop for ReportingGuard {
    fn drop(&mut self) {
        REPORTING.with(|flag| flag.set(false));
    }
}

fn enter_report() -> Option<ReportingGuard> {
    let guard = ReportingGuard::enter();
    if guard.is_none() {
        tracing::warn!("Report issued while another report was being assembled; ignoring");
    }
    guard
}

/// Whether the current thread is inside a report call.
pub(crate) fn reporting_in_progress() -> bool {
    REPORTING.with(Cell::get)
}

/// Run a user-supplied stage, turning a panic into `None`.
fn guarded<T>(stage: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(stage, "Reporting stage panicked; continuing without it");
            None
        }
    }
}

// ============================================
// Settings
// ============================================

/// Levels used when `log` is called without an explicit level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultLevels {
    pub message: Level,
    pub error: Level,
    pub uncaught: Level,
}

impl Default for DefaultLevels {
    fn default() -> Self {
        Self {
            message: Level::Warning,
            error: Level::Error,
            uncaught: Level::Critical,
        }
    }
}

impl DefaultLevels {
    pub fn resolve(&self, has_error: bool, is_uncaught: bool) -> Level {
        if is_uncaught {
            self.uncaught
        } else if has_error {
            self.error
        } else {
            self.message
        }
    }
}

/// Runtime configuration of a [`Notifier`].
///
/// Readers take an `Arc` snapshot, so one report always sees a consistent
/// set of values even while [`Notifier::configure`] swaps in a new one.
#[derive(Clone)]
pub struct Settings {
    pub access_token: String,
    pub environment: Option<String>,
    pub code_version: Option<String>,
    pub platform: Option<String>,
    pub framework: Option<String>,
    /// When false, reporting is a no-op
    pub enabled: bool,
    pub default_levels: DefaultLevels,
    pub providers: Providers,
    pub transformers: TransformerPipeline,
    pub filters: FilterPipeline,
    pub scrubber: Option<Arc<dyn Scrubber>>,
    pub fingerprint: Arc<dyn FingerprintGenerator>,
    pub uuid: Arc<dyn UuidGenerator>,
    pub truncate_large_payloads: bool,
    pub max_payload_bytes: usize,
    /// How long the panic hook waits for queued payloads
    pub panic_flush_timeout: Duration,
}

impl Settings {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            environment: None,
            code_version: None,
            platform: Some(std::env::consts::OS.to_string()),
            framework: None,
            enabled: true,
            default_levels: DefaultLevels::default(),
            providers: Providers::standard(),
            transformers: TransformerPipeline::new(),
            filters: FilterPipeline::new(),
            scrubber: None,
            fingerprint: Arc::new(ErrorFingerprint),
            uuid: Arc::new(RandomUuid),
            truncate_large_payloads: true,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            panic_flush_timeout: Duration::from_secs(2),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.access_token.trim().is_empty() {
            return Err(Error::Config(
                "access token is required and must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("access_token", &"***")
            .field("environment", &self.environment)
            .field("code_version", &self.code_version)
            .field("platform", &self.platform)
            .field("framework", &self.framework)
            .field("enabled", &self.enabled)
            .field("default_levels", &self.default_levels)
            .field("providers", &self.providers)
            .field("transformers", &self.transformers)
            .field("filters", &self.filters)
            .field("scrubber", &self.scrubber.is_some())
            .field("truncate_large_payloads", &self.truncate_large_payloads)
            .finish()
    }
}

// ============================================
// Builder
// ============================================

/// Builds a [`Notifier`].
pub struct NotifierBuilder {
    settings: Settings,
    sender: Option<Arc<dyn Sender>>,
    endpoint: String,
    delivery: DeliveryOptions,
    listener: Option<Arc<dyn DeliveryListener>>,
    telemetry_capacity: usize,
    telemetry_source: TelemetrySource,
}

impl NotifierBuilder {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            settings: Settings::new(access_token),
            sender: None,
            endpoint: crate::config::DEFAULT_ENDPOINT.to_string(),
            delivery: DeliveryOptions::default(),
            listener: None,
            telemetry_capacity: telemetry::MAX_CAPACITY,
            telemetry_source: TelemetrySource::default(),
        }
    }

    /// Start from a loaded configuration file.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.notifier.validate()?;
        config.delivery.validate()?;

        let section = &config.notifier;
        let mut builder = Self::new(section.access_token.clone().unwrap_or_default());
        builder.settings.environment = section.environment.clone();
        builder.settings.code_version = section.code_version.clone();
        builder.settings.framework = section.framework.clone();
        builder.settings.enabled = section.enabled;
        builder.settings.providers = Providers::from_names(&section.providers)?;
        builder.settings.truncate_large_payloads = section.truncate_large_payloads;
        builder.settings.panic_flush_timeout = section.panic_flush_timeout();
        builder.telemetry_capacity = section.telemetry_capacity;

        if !section.fingerprint_fields.is_empty() {
            builder.settings.fingerprint =
                Arc::new(FieldFingerprint::new(section.fingerprint_fields.iter().cloned()));
        }
        if !config.scrub.fields.is_empty() {
            builder.settings.scrubber = Some(Arc::new(FieldScrubber::new(&config.scrub.fields)?));
        }

        builder.endpoint = config.delivery.endpoint.clone();
        builder.delivery = DeliveryOptions::from_config(&config.delivery);
        Ok(builder)
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.settings.environment = Some(environment.into());
        self
    }

    pub fn code_version(mut self, version: impl Into<String>) -> Self {
        self.settings.code_version = Some(version.into());
        self
    }

    pub fn platform(mut self, platform: impl Into<String>) -> Self {
        self.settings.platform = Some(platform.into());
        self
    }

    pub fn framework(mut self, framework: impl Into<String>) -> Self {
        self.settings.framework = Some(framework.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.settings.enabled = enabled;
        self
    }

    pub fn default_levels(mut self, levels: DefaultLevels) -> Self {
        self.settings.default_levels = levels;
        self
    }

    /// Replace the whole provider set.
    pub fn providers(mut self, providers: Providers) -> Self {
        self.settings.providers = providers;
        self
    }

    pub fn server_provider(mut self, provider: impl Provider<ServerInfo> + 'static) -> Self {
        self.settings.providers.server = Some(Arc::new(provider));
        self
    }

    pub fn request_provider(
        mut self,
        provider: impl Provider<Option<RequestInfo>> + 'static,
    ) -> Self {
        self.settings.providers.request = Some(Arc::new(provider));
        self
    }

    pub fn person_provider(mut self, provider: impl Provider<Option<PersonInfo>> + 'static) -> Self {
        self.settings.providers.person = Some(Arc::new(provider));
        self
    }

    pub fn context_provider(mut self, provider: impl Provider<Option<String>> + 'static) -> Self {
        self.settings.providers.context = Some(Arc::new(provider));
        self
    }

    pub fn custom_provider(
        mut self,
        provider: impl Provider<Map<String, Value>> + 'static,
    ) -> Self {
        self.settings.providers.custom = Some(Arc::new(provider));
        self
    }

    /// Append a transformer to the pipeline.
    pub fn transformer(mut self, transformer: impl Transformer + 'static) -> Self {
        self.settings.transformers.push(transformer);
        self
    }

    pub fn filter(mut self, filter: impl Filter + 'static) -> Self {
        self.settings.filters.push(Arc::new(filter));
        self
    }

    pub fn scrubber(mut self, scrubber: impl Scrubber + 'static) -> Self {
        self.settings.scrubber = Some(Arc::new(scrubber));
        self
    }

    /// Redact these field patterns with a [`FieldScrubber`].
    pub fn scrub_fields<I, S>(self, patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.scrubber(FieldScrubber::new(patterns)?))
    }

    pub fn fingerprint_generator(
        mut self,
        generator: impl FingerprintGenerator + 'static,
    ) -> Self {
        self.settings.fingerprint = Arc::new(generator);
        self
    }

    pub fn uuid_generator(mut self, generator: impl UuidGenerator + 'static) -> Self {
        self.settings.uuid = Arc::new(generator);
        self
    }

    pub fn truncate_large_payloads(mut self, enabled: bool) -> Self {
        self.settings.truncate_large_payloads = enabled;
        self
    }

    pub fn max_payload_bytes(mut self, bytes: usize) -> Self {
        self.settings.max_payload_bytes = bytes;
        self
    }

    pub fn panic_flush_timeout(mut self, timeout: Duration) -> Self {
        self.settings.panic_flush_timeout = timeout;
        self
    }

    /// Use a custom sender instead of HTTP.
    pub fn sender(mut self, sender: Arc<dyn Sender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn delivery(mut self, options: DeliveryOptions) -> Self {
        self.delivery = options;
        self
    }

    /// Telemetry events kept for the next occurrence. Clamped to 100; zero
    /// disables telemetry.
    pub fn telemetry_capacity(mut self, capacity: usize) -> Self {
        self.telemetry_capacity = capacity;
        self
    }

    pub fn telemetry_source(mut self, source: TelemetrySource) -> Self {
        self.telemetry_source = source;
        self
    }

    pub fn listener(mut self, listener: Arc<dyn DeliveryListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Validate the settings and start the delivery worker.
    pub fn build(self) -> Result<Notifier> {
        self.settings.validate()?;
        let sender = match self.sender {
            Some(sender) => sender,
            None => Arc::new(HttpSender::new(self.endpoint, self.delivery.send_timeout)?),
        };
        let delivery = DeliveryWorker::spawn(sender, self.delivery, self.listener)?;

        tracing::debug!(
            environment = ?self.settings.environment,
            enabled = self.settings.enabled,
            "Notifier started"
        );
        Ok(Notifier {
            settings: RwLock::new(Arc::new(self.settings)),
            telemetry: TelemetryTracker::new(self.telemetry_capacity)
                .with_source(self.telemetry_source),
            delivery,
        })
    }
}

// ============================================
// Notifier
// ============================================

/// Reports errors and messages to the collection endpoint.
///
/// Share it behind an `Arc`. Dropping the last handle shuts delivery down
/// with the configured grace period.
pub struct Notifier {
    settings: RwLock<Arc<Settings>>,
    telemetry: TelemetryTracker,
    delivery: DeliveryWorker,
}

impl Notifier {
    pub fn builder(access_token: impl Into<String>) -> NotifierBuilder {
        NotifierBuilder::new(access_token)
    }

    /// Build a notifier from a configuration file's contents.
    pub fn from_config(config: &Config) -> Result<Self> {
        NotifierBuilder::from_config(config)?.build()
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> Arc<Settings> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the settings. Reports already in progress keep their snapshot.
    pub fn configure(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(settings);
        Ok(())
    }

    /// Modify a copy of the current settings and swap it in.
    ///
    /// `f` runs without any lock held, so it may report. Concurrent updates
    /// do not merge: the last one to finish wins.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<()> {
        let mut settings = Settings::clone(&self.settings());
        f(&mut settings);
        self.configure(settings)
    }

    /// Report an occurrence. The fully general entry point.
    ///
    /// `level` falls back to the configured default for messages, errors or
    /// uncaught panics. Returns once the payload is queued.
    pub fn log(
        &self,
        level: Option<Level>,
        error: Option<&ErrorReport>,
        message: Option<&str>,
        custom: Option<Map<String, Value>>,
        is_uncaught: bool,
    ) {
        let Some(_guard) = enter_report() else {
            return;
        };
        self.deliver(level, error, message, custom, is_uncaught);
    }

    /// Assemble and queue. The caller holds the reporting guard.
    fn deliver(
        &self,
        level: Option<Level>,
        error: Option<&ErrorReport>,
        message: Option<&str>,
        custom: Option<Map<String, Value>>,
        is_uncaught: bool,
    ) {
        let Some(payload) = self.assemble_payload(
            level,
            error,
            message,
            custom,
            is_uncaught,
            &|| self.telemetry.drain(),
        ) else {
            return;
        };

        let uuid = payload.uuid();
        if self.delivery.enqueue(payload) {
            tracing::debug!(uuid = ?uuid, is_uncaught, "Occurrence queued");
        }
    }

    /// Build the payload `log` would send, without sending it.
    pub fn build_payload(
        &self,
        level: Option<Level>,
        error: Option<&ErrorReport>,
        message: Option<&str>,
        custom: Option<Map<String, Value>>,
    ) -> Option<Payload> {
        let _guard = ReportingGuard::enter()?;
        self.assemble_payload(
            level,
            error,
            message,
            custom,
            false,
            &|| self.telemetry.snapshot(),
        )
    }

    fn assemble_payload(
        &self,
        level: Option<Level>,
        error: Option<&ErrorReport>,
        message: Option<&str>,
        custom: Option<Map<String, Value>>,
        is_uncaught: bool,
        telemetry: &dyn Fn() -> Vec<TelemetryEvent>,
    ) -> Option<Payload> {
        let settings = self.settings();
        let assembled = guarded("assembly", || {
            assemble(&settings, level, error, message, custom, is_uncaught, telemetry)
        })
        .flatten()?;
        prepare(&settings, assembled)
    }

    /// Report an error at `critical`.
    pub fn critical<E: StdError + ?Sized + 'static>(&self, error: &E) {
        self.report(Some(Level::Critical), error);
    }

    /// Report an error at `error`.
    pub fn error<E: StdError + ?Sized + 'static>(&self, error: &E) {
        self.report(Some(Level::Error), error);
    }

    pub fn warning<E: StdError + ?Sized + 'static>(&self, error: &E) {
        self.report(Some(Level::Warning), error);
    }

    pub fn info<E: StdError + ?Sized + 'static>(&self, error: &E) {
        self.report(Some(Level::Info), error);
    }

    pub fn debug<E: StdError + ?Sized + 'static>(&self, error: &E) {
        self.report(Some(Level::Debug), error);
    }

    /// Report an error at the default error level.
    pub fn report<E: StdError + ?Sized + 'static>(&self, level: Option<Level>, error: &E) {
        if !self.settings().enabled {
            return;
        }
        let Some(_guard) = enter_report() else {
            return;
        };
        // Formatting runs user code.
        let report = guarded("error capture", || ErrorReport::from_error(error))
            .unwrap_or_else(ErrorReport::unprintable::<E>);
        self.deliver(level, Some(&report), None, None, false);
    }

    pub fn critical_message(&self, message: &str) {
        self.log(Some(Level::Critical), None, Some(message), None, false);
    }

    pub fn error_message(&self, message: &str) {
        self.log(Some(Level::Error), None, Some(message), None, false);
    }

    pub fn warning_message(&self, message: &str) {
        self.log(Some(Level::Warning), None, Some(message), None, false);
    }

    pub fn info_message(&self, message: &str) {
        self.log(Some(Level::Info), None, Some(message), None, false);
    }

    pub fn debug_message(&self, message: &str) {
        self.log(Some(Level::Debug), None, Some(message), None, false);
    }

    /// Report a message at the default message level.
    pub fn message(&self, message: &str) {
        self.log(None, None, Some(message), None, false);
    }

    /// Queue an already-serialized payload body as is.
    pub fn send_raw(&self, json: impl Into<String>) {
        if !self.settings().enabled {
            return;
        }
        self.delivery.enqueue(Payload::raw(json));
    }

    /// Record a log line as telemetry for the next occurrence.
    pub fn record_log_event(&self, level: Level, message: &str) {
        self.telemetry.record_log(level, message);
    }

    /// Record an application-defined marker as telemetry.
    pub fn record_manual_event(&self, level: Level, message: &str) {
        self.telemetry.record_manual(level, message);
    }

    /// Record a move from one screen or route to another.
    pub fn record_navigation_event(&self, level: Level, from: &str, to: &str) {
        self.telemetry.record_navigation(level, from, to);
    }

    /// Record an outbound network call and its status code.
    pub fn record_network_event(&self, level: Level, method: &str, url: &str, status_code: &str) {
        self.telemetry.record_network(level, method, url, status_code);
    }

    pub fn telemetry(&self) -> &TelemetryTracker {
        &self.telemetry
    }

    /// Wait up to `timeout` for queued payloads to be delivered or dropped.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.delivery.flush(timeout)
    }

    /// Stop delivery, draining for at most `grace`.
    pub fn shutdown(&self, grace: Duration) -> DeliveryStats {
        self.delivery.shutdown(grace)
    }

    pub fn stats(&self) -> DeliveryStats {
        self.delivery.stats()
    }

    /// Payloads waiting for delivery.
    pub fn pending(&self) -> usize {
        self.delivery.pending()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("settings", &self.settings())
            .field("pending", &self.pending())
            .finish()
    }
}

// ============================================
// Assembly stages
// ============================================

fn assemble(
    settings: &Settings,
    level: Option<Level>,
    error: Option<&ErrorReport>,
    message: Option<&str>,
    custom: Option<Map<String, Value>>,
    is_uncaught: bool,
    telemetry: &dyn Fn() -> Vec<TelemetryEvent>,
) -> Option<Payload> {
    if !settings.enabled {
        tracing::trace!("Reporting disabled; skipping occurrence");
        return None;
    }

    let level =
        level.unwrap_or_else(|| settings.default_levels.resolve(error.is_some(), is_uncaught));

    let dropped = guarded("pre-filter", || {
        settings
            .filters
            .pre_process(level, error, custom.as_ref(), message)
    })
    .unwrap_or(false);
    if dropped {
        tracing::debug!(%level, "Occurrence dropped by pre-filter");
        return None;
    }

    let draft = draft(settings, level, error, message, custom, telemetry());

    let data = if settings.transformers.is_empty() {
        draft
    } else {
        let fallback = draft.clone();
        guarded("transformer", || settings.transformers.transform(draft)).unwrap_or(fallback)
    };

    let data = match &settings.scrubber {
        Some(scrubber) => match guarded("scrubber", || scrubber.scrub(data)) {
            Some(data) => data,
            None => {
                tracing::error!("Scrubber panicked; dropping occurrence rather than sending unscrubbed data");
                return None;
            }
        },
        None => data,
    };

    let uuid = guarded("uuid generator", || settings.uuid.generate(&data))
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| RandomUuid.generate(&data));
    let fingerprint = guarded("fingerprint generator", || settings.fingerprint.generate(&data))
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| ErrorFingerprint.generate(&data));
    let data = Occurrence {
        uuid: Some(uuid),
        fingerprint: Some(fingerprint),
        ..data
    };

    let dropped = guarded("post-filter", || settings.filters.post_process(&data)).unwrap_or(false);
    if dropped {
        tracing::debug!(uuid = ?data.uuid, "Occurrence dropped by post-filter");
        return None;
    }

    Some(Payload::item(settings.access_token.clone(), data))
}

/// Run the providers and build the initial occurrence.
fn draft(
    settings: &Settings,
    level: Level,
    error: Option<&ErrorReport>,
    message: Option<&str>,
    custom: Option<Map<String, Value>>,
    telemetry: Vec<TelemetryEvent>,
) -> Occurrence {
    let body = match error {
        Some(report) => report.to_body(message),
        None => Body::message(message.unwrap_or_default()),
    }
    .with_telemetry(telemetry);

    let providers = &settings.providers;
    let mut data = Occurrence::new(level, body);
    data.environment = settings.environment.clone();
    data.code_version = settings.code_version.clone();
    data.platform = settings.platform.clone();
    data.language = Some(LANGUAGE.to_string());
    data.framework = settings.framework.clone();

    if let Some(p) = &providers.notifier {
        data.notifier = guarded("notifier provider", || p.provide());
    }
    if let Some(p) = &providers.server {
        data.server = guarded("server provider", || p.provide());
    }
    if let Some(p) = &providers.timestamp {
        data.timestamp = guarded("timestamp provider", || p.provide());
    }
    if let Some(p) = &providers.request {
        data.request = guarded("request provider", || p.provide()).flatten();
    }
    if let Some(p) = &providers.person {
        data.person = guarded("person provider", || p.provide()).flatten();
    }
    if let Some(p) = &providers.context {
        data.context = guarded("context provider", || p.provide()).flatten();
    }

    // Call-site custom data wins over provided keys.
    let mut merged = providers
        .custom
        .as_ref()
        .and_then(|p| guarded("custom provider", || p.provide()))
        .unwrap_or_default();
    if let Some(custom) = custom {
        merged.extend(custom);
    }
    data.custom = (!merged.is_empty()).then_some(merged);

    data
}

/// Serialize-check the payload and shrink it if it is too large.
fn prepare(settings: &Settings, payload: Payload) -> Option<Payload> {
    if settings.truncate_large_payloads {
        return match truncate::truncate(payload, settings.max_payload_bytes) {
            Ok(truncated) => Some(truncated.payload),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize occurrence; dropping it");
                None
            }
        };
    }

    match payload.to_json() {
        Ok(_) => Some(payload),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize occurrence; dropping it");
            None
        }
    }
}
