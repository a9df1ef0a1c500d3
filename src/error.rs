// SPDX-License-Identifier: MIT OR Apache-2.0
//! Module for error handling code.

use std::fmt::{Display, Formatter};
#[cfg(feature = "backtrace")]
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;

use thiserror::Error;

/// More convenient alias for `Box<dyn StdError + Send + Sync>`,
/// which shows up in a few signatures and structs.
type BoxedError = Box<dyn StdError + Send + Sync>;

/// Kinds of errors for [Error]. Use [ErrorKind::error] and [ErrorKind::error_from] to generate the
/// [Error] value for this ErrorKind.
#[derive(Debug)]
pub enum ErrorKind
{
    /// Selector identified no device.
    AdapterNotFound,

    /// A device exists but no registry entry matches it.
    AdapterNotSupported,

    /// The selector given was ambiguous; carries a list of candidates for display.
    MultipleAdaptersMatch(/** candidate descriptions **/ Vec<String>),

    /// The PTY-holder or the daemon itself failed to exec.
    DaemonSpawnFailed(/** detail **/ Option<String>),

    /// The GDB executable named by `$GDB`/`${HOST}-gdb`/`gdb` could not be found. Distinct
    /// from [DaemonSpawnFailed] because spec.md §6 gives it its own exit code (1).
    GdbNotFound(/** executable name tried **/ String),

    /// The daemon's init phase reported `open failed`.
    AdapterOpenFailed,

    /// `reset-halt` failed (wiring, power, or nRST problem).
    ResetFailed,

    /// Wire communication failure observed mid-probe.
    TargetCommunication,

    /// DAP IDCODE was unreadable or undecodable.
    TargetDap,

    /// A vendor ID-code register read failed.
    TargetMemoryAccess,

    /// The daemon returned a payload the client did not expect for the command sent.
    ProtocolError(/** cmd **/ String, /** response **/ String),

    /// The RPC transport refused the connection.
    ConnectionRefused,

    /// The RPC transport reset the connection.
    ConnectionReset,

    /// A value fell outside the domain a pure decoder function is total over.
    ValueError(/** what **/ String),

    /// Unhandled I/O failure.
    Io,

    /// Unhandled USB enumeration failure.
    UsbError,

    /// Unhandled (de)serialization failure, e.g. a malformed rendezvous file.
    Serialization,

    /// Unhandled external error with no more specific home in this enum.
    External(ErrorSource),
}

impl ErrorKind
{
    /// Creates a new [Error] from this error kind.
    ///
    /// Enables convenient code like:
    /// ```
    /// return Err(ErrorKind::AdapterNotFound.error());
    /// ```
    #[inline(always)]
    pub fn error(self) -> Error
    {
        Error::new(self, None)
    }

    /// Creates a new [Error] from this error kind, with the passed error as the source.
    #[inline(always)]
    pub fn error_from<E: StdError + Send + Sync + 'static>(self, source: E) -> Error
    {
        Error::new(self, Some(Box::new(source)))
    }

    /// The process exit code this kind maps to per the top-level orchestrator's contract.
    pub fn exit_code(&self) -> i32
    {
        use ErrorKind::*;
        match self {
            GdbNotFound(_) => 1,
            ResetFailed => 4,
            AdapterNotFound | AdapterNotSupported | MultipleAdaptersMatch(_) | DaemonSpawnFailed(_) |
            AdapterOpenFailed | TargetDap => 3,
            _ => 3,
        }
    }
}

/// Constructs an [Error] for this [ErrorKind].
impl From<ErrorKind> for Error
{
    fn from(other: ErrorKind) -> Self
    {
        other.error()
    }
}

impl Display for ErrorKind
{
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result
    {
        use ErrorKind::*;
        match self {
            AdapterNotFound => write!(f, "no supported debug adapter matched the given selector")?,
            AdapterNotSupported => write!(f, "a matching USB device was found but it is not a supported debug adapter")?,
            MultipleAdaptersMatch(candidates) => {
                writeln!(f, "selector is ambiguous, {} adapters match:", candidates.len())?;
                for candidate in candidates {
                    writeln!(f, "  {candidate}")?;
                }
            },
            DaemonSpawnFailed(None) => write!(f, "failed to spawn the debug daemon")?,
            DaemonSpawnFailed(Some(detail)) => write!(f, "failed to spawn the debug daemon: {detail}")?,
            GdbNotFound(executable) => write!(f, "GDB executable {executable:?} not found")?,
            AdapterOpenFailed => write!(f, "daemon reported \"open failed\" while opening the adapter")?,
            ResetFailed => write!(f, "target reset-halt failed (check wiring, power, and nRST)")?,
            TargetCommunication => write!(f, "communication failure talking to the target")?,
            TargetDap => write!(f, "could not read or decode the target's DAP IDCODE")?,
            TargetMemoryAccess => write!(f, "vendor ID-code register read failed")?,
            ProtocolError(cmd, response) => {
                write!(f, "daemon returned unexpected response to {cmd:?}: {response:?}")?;
            },
            ConnectionRefused => write!(f, "connection to the daemon was refused")?,
            ConnectionReset => write!(f, "connection to the daemon was reset")?,
            ValueError(what) => write!(f, "value out of domain: {what}")?,
            Io => write!(f, "unhandled I/O error")?,
            UsbError => write!(f, "unhandled USB error")?,
            Serialization => write!(f, "unhandled (de)serialization error")?,
            External(source) => {
                use ErrorSource::*;
                match source {
                    StdIo(e) => write!(f, "unhandled std::io::Error: {e}")?,
                    Usb(e) => write!(f, "unhandled nusb error: {e}")?,
                    Json(e) => write!(f, "unhandled serde_json error: {e}")?,
                };
            },
        };

        Ok(())
    }
}

#[derive(Debug)]
/// Error type for this crate's operations. Easily constructed from [ErrorKind].
pub struct Error
{
    pub kind: ErrorKind,
    pub source: Option<BoxedError>,

    /// Stores the backtrace for this error.
    #[cfg(feature = "backtrace")]
    pub backtrace: Box<Backtrace>,

    /// A string for additional context about what was being attempted when this error occurred.
    ///
    /// Example: "reading DBGMCU_IDCODE".
    pub context: Option<String>,
}

impl Error
{
    #[inline(always)]
    pub fn new(kind: ErrorKind, source: Option<BoxedError>) -> Self
    {
        Self {
            kind,
            source,
            context: None,
            #[cfg(feature = "backtrace")]
            backtrace: Box::new(Backtrace::capture()),
        }
    }

    #[allow(dead_code)]
    /// Add additional context about what was being attempted when this error occurred.
    pub fn with_ctx(mut self, ctx: &str) -> Self
    {
        self.context = Some(ctx.to_string());
        self
    }

    #[cfg(feature = "backtrace")]
    #[allow(dead_code)]
    fn backtrace(&self) -> Option<&Backtrace>
    {
        Some(&self.backtrace)
    }
}

impl Display for Error
{
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result
    {
        if let Some(ctx) = &self.context {
            write!(f, "(while {}): {}", ctx, self.kind)?;
        } else {
            write!(f, "{}", self.kind)?;
        }

        #[cfg(feature = "backtrace")]
        {
            if self.backtrace.status() == BacktraceStatus::Captured {
                write!(f, "\nBacktrace:\n{}", self.backtrace)?;
            }
        }

        if let Some(source) = &self.source {
            writeln!(f, "\nCaused by: {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)>
    {
        self.source.as_deref().map(|e| e as &dyn StdError)
    }
}

impl From<std::io::Error> for Error
{
    fn from(other: std::io::Error) -> Self
    {
        use std::io::ErrorKind as IoKind;
        match other.kind() {
            IoKind::ConnectionRefused => ErrorKind::ConnectionRefused.error_from(other),
            IoKind::ConnectionReset | IoKind::UnexpectedEof | IoKind::BrokenPipe => {
                ErrorKind::ConnectionReset.error_from(other)
            },
            _ => ErrorKind::External(ErrorSource::StdIo(other)).error(),
        }
    }
}

impl From<nusb::Error> for Error
{
    fn from(other: nusb::Error) -> Self
    {
        ErrorKind::External(ErrorSource::Usb(other)).error()
    }
}

impl From<serde_json::Error> for Error
{
    fn from(other: serde_json::Error) -> Self
    {
        ErrorKind::Serialization.error_from(ErrorSource::Json(other))
    }
}

/// Sources of external error in this library.
#[derive(Debug, Error)]
pub enum ErrorSource
{
    #[error(transparent)]
    StdIo(#[from] std::io::Error),

    #[error(transparent)]
    Usb(#[from] nusb::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Extension trait to enable getting the error kind from a Result<T, Error> with one method.
pub trait ResErrorKind<T>
{
    type Kind;
    fn err_kind(&self) -> Result<&T, &Self::Kind>;
}

impl<T> ResErrorKind<T> for Result<T, Error>
{
    type Kind = ErrorKind;

    fn err_kind(&self) -> Result<&T, &Self::Kind>
    {
        self.as_ref().map_err(|e| &e.kind)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn gdb_not_found_exits_1_distinct_from_daemon_spawn_failed()
    {
        assert_eq!(ErrorKind::GdbNotFound("gdb".to_string()).exit_code(), 1);
        assert_eq!(ErrorKind::DaemonSpawnFailed(None).exit_code(), 3);
    }
}

#[macro_export]
macro_rules! log_and_return
{
    ($err:expr) => {
        let err = $err;
        log::error!("{}", err);
        return Err(err);
    }
}
