//! Unified error types for the scripting bridge.
//!
//! This module provides a consistent error hierarchy for both sides of the
//! host/interpreter boundary:
//!
//! ```text
//! BridgeError (host-facing, one variant per error-proper kind)
//! ├── Syntax           - chunk failed to compile
//! ├── Runtime          - script raised or propagated an error
//! ├── Memory           - interpreter allocation failure (fatal)
//! ├── GarbageCollector - failure during a reclamation pass (fatal)
//! ├── MessageHandler   - the error-reporting path itself failed (fatal)
//! └── Invalid          - bad request (unknown function, faulted context, ...)
//!
//! AccessError (script-initiated member access, catchable from Lua)
//! ```
//!
//! `Ok` and `Yield` complete the eight-kind domain but are successful
//! outcomes, not errors; they appear in [`ErrorKind`] for callers that need
//! the full enumeration and as `CallOutcome` on the call surface.
//!
//! Every failure path of a public operation maps to exactly one
//! [`BridgeError`] variant. Interpreter errors arriving as [`mlua::Error`]
//! are classified by [`BridgeError::from_interpreter`]; errors we raised
//! ourselves inside interpreter callbacks travel through the interpreter as
//! external errors and are recovered here with their kind intact.

use thiserror::Error;

/// The eight result kinds of the bridge's error domain.
///
/// Mirrors the interpreter's status-code model: `Ok` and `Yield` are
/// successful outcomes, the remaining six are failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    Ok = 0,
    Yield,
    Runtime,
    Syntax,
    Memory,
    GarbageCollector,
    MessageHandler,
    Invalid,
}

/// A failure surfaced by a public bridge operation.
///
/// Carries a human-readable message; [`BridgeError::is_fatal`] tells the
/// caller whether the owning context transitioned to `Faulted`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// The script source failed to compile. Reported only by `parse`,
    /// never by `call`.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The script raised or propagated a runtime error during execution.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Interpreter-side allocation failure. Fatal to the context.
    #[error("interpreter allocation failure: {0}")]
    Memory(String),

    /// A failure surfaced from the interpreter's memory reclamation pass.
    /// Fatal to the context.
    #[error("garbage collection failure: {0}")]
    GarbageCollector(String),

    /// The error-reporting path itself failed while formatting a primary
    /// error. Both are reported best-effort; fatal to the context.
    #[error("failure inside the message handler: {0}")]
    MessageHandler(String),

    /// The request itself was invalid: unknown function, non-callable
    /// global, unmarshalable value, faulted context.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl BridgeError {
    /// The kind of this error within the eight-kind domain.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Syntax(_) => ErrorKind::Syntax,
            BridgeError::Runtime(_) => ErrorKind::Runtime,
            BridgeError::Memory(_) => ErrorKind::Memory,
            BridgeError::GarbageCollector(_) => ErrorKind::GarbageCollector,
            BridgeError::MessageHandler(_) => ErrorKind::MessageHandler,
            BridgeError::Invalid(_) => ErrorKind::Invalid,
        }
    }

    /// The human-readable message carried by this error.
    pub fn message(&self) -> &str {
        match self {
            BridgeError::Syntax(m)
            | BridgeError::Runtime(m)
            | BridgeError::Memory(m)
            | BridgeError::GarbageCollector(m)
            | BridgeError::MessageHandler(m)
            | BridgeError::Invalid(m) => m,
        }
    }

    /// Whether this error leaves the interpreter handle unusable.
    ///
    /// `Memory`, `GarbageCollector` and `MessageHandler` force the owning
    /// context into `Faulted`; everything else is recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::Memory(_)
                | BridgeError::GarbageCollector(_)
                | BridgeError::MessageHandler(_)
        )
    }

    /// Classify an interpreter error into a bridge error.
    ///
    /// Callback-raised [`BridgeError`]s are unwrapped with their original
    /// kind. Plain runtime messages are inspected for the finalizer and
    /// message-handler failure markers, which the interpreter's C API
    /// reports as distinct status codes but the safe wrapper folds into
    /// runtime errors.
    pub fn from_interpreter(err: &mlua::Error) -> Self {
        match err {
            mlua::Error::SyntaxError { message, .. } => BridgeError::Syntax(message.clone()),
            mlua::Error::MemoryError(message) => BridgeError::Memory(message.clone()),
            mlua::Error::RuntimeError(message) => Self::classify_runtime(message),
            mlua::Error::CallbackError { cause, .. } => Self::from_interpreter(cause.as_ref()),
            mlua::Error::WithContext { cause, .. } => Self::from_interpreter(cause.as_ref()),
            mlua::Error::ExternalError(cause) => match cause.downcast_ref::<BridgeError>() {
                Some(bridge) => bridge.clone(),
                None => BridgeError::Runtime(cause.to_string()),
            },
            other => BridgeError::Runtime(other.to_string()),
        }
    }

    fn classify_runtime(message: &str) -> Self {
        // Script-raised errors carry a "chunk:line:" position prefix, so
        // only the interpreter's own diagnostics start with these markers.
        if message.starts_with("error in error handling") {
            BridgeError::MessageHandler(message.to_owned())
        } else if message.starts_with("error in __gc metamethod") {
            BridgeError::GarbageCollector(message.to_owned())
        } else {
            BridgeError::Runtime(message.to_owned())
        }
    }
}

impl From<mlua::Error> for BridgeError {
    fn from(err: mlua::Error) -> Self {
        BridgeError::from_interpreter(&err)
    }
}

/// A failure during script-initiated property or method access.
///
/// Raised inside interpreter callbacks and surfaced to the script as a
/// catchable runtime condition. When it escapes the enclosing `call`, it
/// reaches the host as `Runtime`, or as `Invalid` when no matching
/// registry entry existed at all.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccessError {
    /// Neither a property nor a method of this name is exported.
    #[error("type '{type_name}' exports no member named '{name}'")]
    NoSuchMember { type_name: String, name: String },

    /// The property exists but was not registered as readable.
    #[error("property '{name}' of '{type_name}' is not readable")]
    NotReadable { type_name: String, name: String },

    /// The property exists but was not registered as writable.
    #[error("property '{name}' of '{type_name}' is not writable")]
    NotWritable { type_name: String, name: String },

    /// The host dropped the instance; the non-owning handle is dangling.
    #[error("host instance of '{type_name}' is no longer alive")]
    InstanceGone { type_name: String },

    /// The instance is already borrowed by an enclosing access.
    #[error("host instance of '{type_name}' is already in use")]
    InstanceBusy { type_name: String },

    /// A marshaled value did not have the type an accessor required.
    #[error("expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// A method was invoked with the wrong number of arguments.
    #[error("method '{name}' expects {expected} argument(s), got {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}

impl AccessError {
    /// Shorthand for [`AccessError::TypeMismatch`].
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        AccessError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<AccessError> for mlua::Error {
    /// Wrap an access failure for propagation through the interpreter.
    ///
    /// A denial with no matching entry keeps the `Invalid` kind; every
    /// other access failure is a `Runtime` condition. The wrapped error is
    /// catchable from the script via `pcall`.
    fn from(err: AccessError) -> Self {
        let message = err.to_string();
        let wrapped = match err {
            AccessError::NoSuchMember { .. } => BridgeError::Invalid(message),
            _ => BridgeError::Runtime(message),
        };
        mlua::Error::external(wrapped)
    }
}
