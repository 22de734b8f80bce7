//! Diagnostic logging boundary.
//!
//! Components emit diagnostics through the [`Logger`] capability and never
//! depend on a concrete back end. Two back ends ship with the crate: the
//! system logger ([`SyslogLogger`]) and a timestamped stderr writer
//! ([`StderrLogger`]); [`logger_by_name`] selects one by textual name.

use std::ffi::CString;

use time::macros::format_description;
use time::OffsetDateTime;

/// Message severity, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Sink for formatted diagnostic messages.
pub trait Logger {
    fn log(&self, severity: Severity, message: &str);
}

/// Default logger that discards all messages.
#[derive(Default, Clone)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&self, _severity: Severity, _message: &str) {}
}

/// Timestamped stderr logger.
///
/// Lines look like `Thu Aug 30 14:22:03 2026 myservice: message`. Debug
/// messages are dropped unless [`StderrLogger::with_debug`] enabled them.
pub struct StderrLogger {
    ident: String,
    debug: bool,
}

impl StderrLogger {
    pub fn new(ident: &str) -> Self {
        Self {
            ident: ident.to_owned(),
            debug: false,
        }
    }

    /// Lets debug-severity messages through.
    pub fn with_debug(mut self) -> Self {
        self.debug = true;
        self
    }
}

impl Logger for StderrLogger {
    fn log(&self, severity: Severity, message: &str) {
        if severity == Severity::Debug && !self.debug {
            return;
        }
        let format = format_description!(
            "[weekday repr:short] [month repr:short] [day] [hour]:[minute]:[second] [year]"
        );
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let stamp = now.format(&format).unwrap_or_default();
        eprintln!("{stamp} {}: {message}", self.ident);
    }
}

/// System logger back end over syslog(3).
///
/// Opens the log on construction with the supplied ident and the user
/// facility, and closes it on drop. The ident buffer is held for the lifetime
/// of the logger because the OS keeps a pointer to it.
pub struct SyslogLogger {
    _ident: CString,
}

impl SyslogLogger {
    pub fn new(ident: &str) -> Self {
        let ident = CString::new(ident.replace('\0', " "))
            .unwrap_or_else(|_| CString::from(c"millrace"));
        unsafe {
            libc::openlog(ident.as_ptr(), 0, libc::LOG_USER);
        }
        Self { _ident: ident }
    }
}

impl Logger for SyslogLogger {
    fn log(&self, severity: Severity, message: &str) {
        let priority = match severity {
            Severity::Debug => libc::LOG_DEBUG,
            Severity::Info => libc::LOG_INFO,
            Severity::Warn => libc::LOG_WARNING,
            Severity::Error => libc::LOG_ERR,
        };
        if let Ok(message) = CString::new(message.replace('\0', " ")) {
            unsafe {
                libc::syslog(priority, c"%s".as_ptr(), message.as_ptr());
            }
        }
    }
}

impl Drop for SyslogLogger {
    fn drop(&mut self) {
        unsafe {
            libc::closelog();
        }
    }
}

/// Returns the back end matching `kind` ("syslog" or "stderr",
/// case-insensitive), or `None` for an unknown name.
pub fn logger_by_name(kind: &str, ident: &str) -> Option<Box<dyn Logger>> {
    if kind.eq_ignore_ascii_case("syslog") {
        return Some(Box::new(SyslogLogger::new(ident)));
    }
    if kind.eq_ignore_ascii_case("stderr") {
        return Some(Box::new(StderrLogger::new(ident)));
    }
    None
}
