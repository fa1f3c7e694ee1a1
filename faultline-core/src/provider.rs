//! Context providers
//!
//! A provider produces one occurrence attribute on demand: the notifier
//! identity, the server, a timestamp, the current request and so on. Any
//! `Fn() -> T + Send + Sync` closure is a provider.
//!
//! Providers must not block. One that cannot produce its value returns a
//! sensible default instead of failing.

use crate::error::{Error, Result};
use crate::types::{NotifierInfo, PersonInfo, RequestInfo, ServerInfo};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

/// Name reported in the `notifier` attribute.
pub const NOTIFIER_NAME: &str = "faultline-rust";

/// Produces a value of type `T` each time an occurrence is assembled.
pub trait Provider<T>: Send + Sync {
    fn provide(&self) -> T;
}

impl<T, F> Provider<T> for F
where
    F: Fn() -> T + Send + Sync,
{
    fn provide(&self) -> T {
        self()
    }
}

// ============================================
// Built-in providers
// ============================================

/// Reports this library's name and version.
#[derive(Debug, Clone)]
pub struct NotifierProvider {
    info: NotifierInfo,
}

impl Default for NotifierProvider {
    fn default() -> Self {
        Self {
            info: NotifierInfo {
                name: NOTIFIER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

impl Provider<NotifierInfo> for NotifierProvider {
    fn provide(&self) -> NotifierInfo {
        self.info.clone()
    }
}

/// Reports the host name plus optional static server details.
///
/// The host is resolved once at construction so assembly never touches the
/// filesystem.
#[derive(Debug, Clone)]
pub struct ServerProvider {
    pub host: String,
    pub root: Option<String>,
    pub branch: Option<String>,
    pub code_version: Option<String>,
}

impl Default for ServerProvider {
    fn default() -> Self {
        Self {
            host: hostname(),
            root: None,
            branch: None,
            code_version: None,
        }
    }
}

impl ServerProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Provider<ServerInfo> for ServerProvider {
    fn provide(&self) -> ServerInfo {
        ServerInfo {
            host: Some(self.host.clone()),
            root: self.root.clone(),
            branch: self.branch.clone(),
            code_version: self.code_version.clone(),
        }
    }
}

/// Host name from the environment or `/etc/hostname`, `localhost` otherwise.
pub fn hostname() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .chain(std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .find(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Current time as seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampProvider;

impl Provider<i64> for TimestampProvider {
    fn provide(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Always reports the same request snapshot.
#[derive(Debug, Clone)]
pub struct RequestProvider {
    request: RequestInfo,
}

impl RequestProvider {
    pub fn new(request: RequestInfo) -> Self {
        Self { request }
    }
}

impl Provider<Option<RequestInfo>> for RequestProvider {
    fn provide(&self) -> Option<RequestInfo> {
        Some(self.request.clone())
    }
}

thread_local! {
    static CURRENT_REQUEST: RefCell<Option<RequestInfo>> = const { RefCell::new(None) };
}

/// Reports the request bound to the calling thread with [`request_scope`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopedRequestProvider;

impl Provider<Option<RequestInfo>> for ScopedRequestProvider {
    fn provide(&self) -> Option<RequestInfo> {
        CURRENT_REQUEST.with(|slot| slot.borrow().clone())
    }
}

/// Bind `request` to the current thread until the returned guard drops.
///
/// Scopes nest: dropping an inner guard restores the outer request.
pub fn request_scope(request: RequestInfo) -> RequestScope {
    let previous = CURRENT_REQUEST.with(|slot| slot.borrow_mut().replace(request));
    RequestScope { previous }
}

/// Guard returned by [`request_scope`].
#[must_use = "the request is unbound as soon as the scope is dropped"]
pub struct RequestScope {
    previous: Option<RequestInfo>,
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_REQUEST.with(|slot| *slot.borrow_mut() = previous);
    }
}

// ============================================
// Provider set
// ============================================

/// The providers consulted during assembly, one optional slot per attribute.
#[derive(Clone, Default)]
pub struct Providers {
    pub notifier: Option<Arc<dyn Provider<NotifierInfo>>>,
    pub server: Option<Arc<dyn Provider<ServerInfo>>>,
    pub timestamp: Option<Arc<dyn Provider<i64>>>,
    pub request: Option<Arc<dyn Provider<Option<RequestInfo>>>>,
    pub person: Option<Arc<dyn Provider<Option<PersonInfo>>>>,
    pub context: Option<Arc<dyn Provider<Option<String>>>>,
    pub custom: Option<Arc<dyn Provider<Map<String, Value>>>>,
}

impl Providers {
    /// No providers at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Notifier identity, server and timestamp.
    pub fn standard() -> Self {
        Self {
            notifier: Some(Arc::new(NotifierProvider::default())),
            server: Some(Arc::new(ServerProvider::new())),
            timestamp: Some(Arc::new(TimestampProvider)),
            ..Self::default()
        }
    }

    /// Enable built-in providers by name (`notifier`, `server`,
    /// `timestamp`, `request`).
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut providers = Self::none();
        for name in names {
            match name.as_ref() {
                "notifier" => providers.notifier = Some(Arc::new(NotifierProvider::default())),
                "server" => providers.server = Some(Arc::new(ServerProvider::new())),
                "timestamp" => providers.timestamp = Some(Arc::new(TimestampProvider)),
                "request" => providers.request = Some(Arc::new(ScopedRequestProvider)),
                other => {
                    return Err(Error::Config(format!("unknown provider: {}", other)));
                }
            }
        }
        Ok(providers)
    }
}

impl fmt::Debug for Providers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Providers")
            .field("notifier", &self.notifier.is_some())
            .field("server", &self.server.is_some())
            .field("timestamp", &self.timestamp.is_some())
            .field("request", &self.request.is_some())
            .field("person", &self.person.is_some())
            .field("context", &self.context.is_some())
            .field("custom", &self.custom.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_provider() {
        let provider = || "checkout".to_string();
        assert_eq!(Provider::<String>::provide(&provider), "checkout");
    }

    #[test]
    fn test_notifier_provider() {
        let info = NotifierProvider::default().provide();
        assert_eq!(info.name, NOTIFIER_NAME);
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_server_provider_always_has_host() {
        let provider = ServerProvider {
            branch: Some("main".to_string()),
            ..Default::default()
        };
        let info = provider.provide();
        assert!(info.host.is_some_and(|h| !h.is_empty()));
        assert_eq!(info.branch.as_deref(), Some("main"));
    }

    #[test]
    fn test_server_provider_reuses_resolved_host() {
        let provider = ServerProvider {
            host: "build-01".to_string(),
            ..ServerProvider::new()
        };
        for _ in 0..3 {
            assert_eq!(provider.provide().host.as_deref(), Some("build-01"));
        }
        assert_eq!(provider.clone().provide().host.as_deref(), Some("build-01"));
    }

    #[test]
    fn test_timestamp_provider_is_recent() {
        let ts = TimestampProvider.provide();
        let now = chrono::Utc::now().timestamp();
        assert!((now - ts).abs() <= 1);
    }

    #[test]
    fn test_request_scope_binds_and_restores() {
        let provider = ScopedRequestProvider;
        assert!(provider.provide().is_none());

        let outer = RequestInfo {
            url: Some("https://example.com/a".to_string()),
            ..Default::default()
        };
        let _outer = request_scope(outer);
        {
            let inner = RequestInfo {
                url: Some("https://example.com/b".to_string()),
                ..Default::default()
            };
            let _inner = request_scope(inner);
            assert_eq!(
                provider.provide().and_then(|r| r.url).as_deref(),
                Some("https://example.com/b")
            );
        }
        assert_eq!(
            provider.provide().and_then(|r| r.url).as_deref(),
            Some("https://example.com/a")
        );
    }

    #[test]
    fn test_request_scope_is_per_thread() {
        let _scope = request_scope(RequestInfo::default());
        let seen = std::thread::spawn(|| ScopedRequestProvider.provide().is_some())
            .join()
            .unwrap();
        assert!(!seen);
    }

    #[test]
    fn test_from_names() {
        let providers = Providers::from_names(&["notifier", "timestamp"]).unwrap();
        assert!(providers.notifier.is_some());
        assert!(providers.timestamp.is_some());
        assert!(providers.server.is_none());

        assert!(Providers::from_names(&["weather"]).is_err());
    }
}
