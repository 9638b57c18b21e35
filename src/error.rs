//! Error types and the failure model.
//!
//! Jobs signal failure by returning `Err` (never by unwinding); the
//! scheduler delivers the error to the failing job's monitor and keeps
//! cycling. An error that no monitor handles is recorded as the
//! scheduler's uncaught error and ends top-level driving.
//!
//! Principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Per-job failures never unwind the scheduler loop
//! - Backtraces are captured only when the scheduler (or the job's
//!   context) asks for them

use core::fmt;
use std::backtrace::Backtrace;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A job's thunk returned `Err`. Delivered to the job's monitor.
    Job,
    /// An error reached the root monitor without a handler; the
    /// scheduler is dead.
    Uncaught,
    /// Invalid input to the engine (e.g. driving a dead scheduler).
    Misuse,
    /// Entry refused after `make_async_unusable`.
    AccessDenied,
    /// An alarm deadline exceeded the configured maximum.
    AlarmTooFar,
}

/// The main error type.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    backtrace: Option<Arc<Backtrace>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
            backtrace: None,
        }
    }

    /// Creates a job failure carrying a message.
    #[must_use]
    pub fn job_failure(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Job).with_context(msg)
    }

    /// Creates a misuse error carrying a message.
    #[must_use]
    pub fn misuse(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Misuse).with_context(msg)
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error was recorded as uncaught.
    #[must_use]
    pub const fn is_uncaught(&self) -> bool {
        matches!(self.kind, ErrorKind::Uncaught)
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Attaches a captured backtrace.
    #[must_use]
    pub fn with_backtrace(mut self, backtrace: Backtrace) -> Self {
        self.backtrace = Some(Arc::new(backtrace));
        self
    }

    /// Re-kinds the error, keeping context, source, and backtrace.
    #[must_use]
    pub(crate) fn into_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    /// The backtrace captured at delivery, if any.
    #[must_use]
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized Result type for engine operations.
pub type Result<T> = core::result::Result<T, Error>;
