//! Error capture
//!
//! [`ErrorReport`] is what the notifier reports: a class name, a message,
//! the frames of a captured backtrace and an optional cause. It can be built
//! from any `std::error::Error` (walking `source()`), from a panic, or by
//! hand.

use crate::types::{Body, ExceptionInfo, Frame, Trace};
use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::panic::Location;

/// Causes deeper than this are not followed.
const MAX_CAUSE_DEPTH: usize = 16;

/// Message used when an error cannot be formatted.
pub const UNPRINTABLE_MESSAGE: &str = "<unprintable error>";

/// A captured error and its cause chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub class_name: String,
    pub message: Option<String>,
    /// Frames, oldest call first
    pub frames: Vec<Frame>,
    pub cause: Option<Box<ErrorReport>>,
}

impl ErrorReport {
    /// Create a report with no frames.
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            class_name: class_name.into(),
            message: (!message.is_empty()).then_some(message),
            frames: Vec::new(),
            cause: None,
        }
    }

    pub fn with_frames(mut self, frames: Vec<Frame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_cause(mut self, cause: ErrorReport) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach a backtrace captured at the call site.
    pub fn with_backtrace(self) -> Self {
        let frames = capture_frames();
        self.with_frames(frames)
    }

    /// Build a report from an error value.
    ///
    /// The class is the error's type path. A backtrace is captured at the
    /// call site and attached to the outermost error; causes reached through
    /// `source()` carry no frames.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: StdError + ?Sized + 'static,
    {
        let type_name = std::any::type_name::<E>();
        let class_name = if type_name.starts_with("dyn ") {
            class_from_debug(&format!("{:?}", error))
        } else {
            strip_generics(type_name).to_string()
        };

        let mut report = ErrorReport::new(class_name, error.to_string());
        report.frames = capture_frames();
        report.cause = error.source().map(|source| Box::new(cause_chain(source, 1)));
        report
    }

    /// Report for an error whose `Display` or `Debug` could not be rendered.
    /// Only the type is known.
    pub fn unprintable<E: ?Sized>() -> Self {
        ErrorReport::new(strip_generics(std::any::type_name::<E>()), UNPRINTABLE_MESSAGE)
            .with_backtrace()
    }

    /// Build a report for a panic.
    pub fn from_panic(message: &str, location: Option<&Location<'_>>) -> Self {
        let mut frames = capture_frames();
        if frames.is_empty() {
            if let Some(location) = location {
                frames.push(Frame {
                    filename: location.file().to_string(),
                    lineno: Some(location.line()),
                    colno: Some(location.column()),
                    ..Default::default()
                });
            }
        }
        ErrorReport::new("panic", message).with_frames(frames)
    }

    /// This report followed by its causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &ErrorReport> {
        std::iter::successors(Some(self), |r| r.cause.as_deref())
    }

    fn to_trace(&self, description: Option<&str>) -> Trace {
        Trace {
            frames: self.frames.clone(),
            exception: ExceptionInfo {
                class_name: self.class_name.clone(),
                message: self.message.clone(),
                description: description.map(str::to_string),
            },
        }
    }

    /// Convert to an occurrence body: a single trace, or a trace chain when
    /// there is a cause. The description goes on the outermost trace.
    pub fn to_body(&self, description: Option<&str>) -> Body {
        if self.cause.is_none() {
            return Body::trace(self.to_trace(description));
        }
        let chain = self
            .chain()
            .enumerate()
            .map(|(i, report)| report.to_trace(if i == 0 { description } else { None }))
            .collect();
        Body::trace_chain(chain)
    }
}

fn cause_chain(error: &(dyn StdError + 'static), depth: usize) -> ErrorReport {
    let mut report = ErrorReport::new(class_from_debug(&format!("{:?}", error)), error.to_string());
    if depth < MAX_CAUSE_DEPTH {
        report.cause = error
            .source()
            .map(|source| Box::new(cause_chain(source, depth + 1)));
    }
    report
}

fn strip_generics(type_name: &str) -> &str {
    type_name.split('<').next().unwrap_or(type_name)
}

/// Best-effort type name from `Debug` output: `ParseIntError { kind: .. }`
/// gives `ParseIntError`.
fn class_from_debug(debug: &str) -> String {
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if name.is_empty() {
        "Error".to_string()
    } else {
        name
    }
}

/// Capture the current backtrace, minus the capture machinery itself.
pub fn capture_frames() -> Vec<Frame> {
    let backtrace = Backtrace::force_capture();
    let mut frames = parse_backtrace(&backtrace.to_string());
    // Newest frames are last; drop the ones belonging to this module.
    while frames.last().is_some_and(is_capture_frame) {
        frames.pop();
    }
    frames
}

fn is_capture_frame(frame: &Frame) -> bool {
    frame.method.as_deref().is_some_and(|m| {
        m.starts_with("std::backtrace")
            || m.starts_with("faultline_core::error_report::")
            || m.starts_with("<faultline_core::error_report::")
    })
}

/// Parse the `Display` output of a std backtrace into frames, oldest first.
///
/// The format is a numbered function line followed by an optional
/// `at file:line:col` line:
///
/// ```text
///    4: my_app::handlers::process
///              at ./src/handlers.rs:42:9
/// ```
pub fn parse_backtrace(text: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                apply_location(frame, location);
            }
            continue;
        }
        let Some((index, function)) = line.split_once(": ") else {
            continue;
        };
        if index.parse::<usize>().is_err() || function.is_empty() {
            continue;
        }
        let module = function
            .rfind("::")
            .map(|idx| function[..idx].to_string())
            .filter(|m| !m.is_empty());
        frames.push(Frame {
            method: Some(function.to_string()),
            class_name: module,
            ..Default::default()
        });
    }

    frames.reverse();
    frames
}

fn apply_location(frame: &mut Frame, location: &str) {
    let mut parts = location.rsplitn(3, ':');
    let last = parts.next();
    let middle = parts.next();
    let rest = parts.next();

    match (rest, middle, last) {
        (Some(file), Some(line), Some(col)) if line.parse::<u32>().is_ok() => {
            frame.filename = file.to_string();
            frame.lineno = line.parse().ok();
            frame.colno = col.parse().ok();
        }
        (_, Some(file), Some(line)) if line.parse::<u32>().is_ok() => {
            let file = match rest {
                Some(prefix) => format!("{}:{}", prefix, file),
                None => file.to_string(),
            };
            frame.filename = file;
            frame.lineno = line.parse().ok();
        }
        _ => frame.filename = location.to_string(),
    }
}
