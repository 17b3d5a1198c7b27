//! Error types and result definitions for spool operations.
//!
//! [`SpoolError`] carries a classified [`ErrorKind`], a static description, optional dynamic
//! detail, an optional source error and the callsite where it was created.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for spool operations.
pub type SpoolResult<T> = Result<T, SpoolError>;

/// Main error type for spool operations.
///
/// Cheap to clone: the source and backtrace are shared.
#[derive(Debug, Clone)]
pub struct SpoolError {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Categories of errors raised by spool components.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Read-ahead errors
    SourceFailed,
    ProducerLost,
    Canceled,

    // Shared use errors
    UseWaitTimeout,
    ResourceGone,

    // Working directory errors
    WorkdirNamesExhausted,
    PayloadFailed,

    // Runtime errors
    WorkerSpawnFailed,
    InvalidState,

    // Configuration & IO errors
    ConfigError,
    IoError,
}

impl SpoolError {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the dynamic detail if available.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Returns the callsite location where this error was created.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Attaches an originating error and returns the modified instance.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        SpoolError {
            kind,
            description,
            detail,
            source,
            location: Location::caller(),
            backtrace: Arc::new(Backtrace::capture()),
        }
    }
}

/// Two errors are equal when their kinds are.
impl PartialEq for SpoolError {
    fn eq(&self, other: &SpoolError) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for SpoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.kind,
            self.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        if let Some(detail) = self.detail.as_deref() {
            write_indented(f, "Detail:", detail)?;
        }

        if let Some(source) = self.source.as_ref() {
            write_indented(f, "Caused by:", &source.to_string())?;
        }

        let backtrace = self.backtrace.to_string();
        if !backtrace.trim().is_empty() {
            write_indented(f, "Backtrace:", &backtrace)?;
        }

        Ok(())
    }
}

impl error::Error for SpoolError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn error::Error + 'static))
    }
}

/// Writes a labeled, indented block under the headline.
fn write_indented(f: &mut fmt::Formatter<'_>, label: &str, body: &str) -> fmt::Result {
    write!(f, "\n  {label}")?;
    for line in body.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

/// Creates a [`SpoolError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for SpoolError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SpoolError {
        SpoolError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`SpoolError`] from an error kind, static description and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for SpoolError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SpoolError {
        SpoolError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Converts [`std::io::Error`] to [`SpoolError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for SpoolError {
    #[track_caller]
    fn from(err: std::io::Error) -> SpoolError {
        let detail = err.to_string();
        SpoolError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts configuration validation failures to [`ErrorKind::ConfigError`].
impl From<spool_config::shared::ValidationError> for SpoolError {
    #[track_caller]
    fn from(err: spool_config::shared::ValidationError) -> SpoolError {
        let detail = err.to_string();
        SpoolError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Invalid configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
