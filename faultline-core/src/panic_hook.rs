//! Panic hook integration
//!
//! [`install`] chains a hook in front of the one already registered. Each
//! panic is reported at the uncaught level, queued payloads get a short
//! window to flush, and then the previous hook runs as usual.

use std::panic::PanicHookInfo;
use std::sync::{Arc, Weak};

use crate::error_report::ErrorReport;
use crate::notifier::{reporting_in_progress, Notifier};

/// Report panics through `notifier`.
///
/// The hook holds a weak reference, so it stops reporting once the last
/// `Arc<Notifier>` is dropped.
pub fn install(notifier: &Arc<Notifier>) {
    let notifier: Weak<Notifier> = Arc::downgrade(notifier);
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        // A panic raised while assembling a report is not reported again.
        if !reporting_in_progress() {
            if let Some(notifier) = notifier.upgrade() {
                report_panic(&notifier, info);
            }
        }
        previous(info);
    }));
}

fn report_panic(notifier: &Notifier, info: &PanicHookInfo<'_>) {
    let message = panic_message(info);
    let report = ErrorReport::from_panic(&message, info.location());
    notifier.log(None, Some(&report), None, None, true);

    let timeout = notifier.settings().panic_flush_timeout;
    if !notifier.flush(timeout) {
        tracing::warn!(
            timeout_ms = timeout.as_millis() as u64,
            "Panic report may not have been delivered before the flush timeout"
        );
    }
}

/// Extract the panic payload as text.
pub fn panic_message(info: &PanicHookInfo<'_>) -> String {
    if let Some(s) = info.payload().downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
