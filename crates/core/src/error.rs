use crate::{EffectKind, Handle, HandleKind};

/// Result alias that carries the custom [`VoiceGraphError`] type.
pub type Result<T> = std::result::Result<T, VoiceGraphError>;

/// Common error type for the core crate.
///
/// Every variant is recoverable: a failed call leaves the graph exactly as it
/// was before the call (or as close to it as the render backend allows).
#[derive(Debug, thiserror::Error)]
pub enum VoiceGraphError {
    /// The handle has the wrong tag, points outside the table, or addresses a
    /// slot that is empty or has been reused since the handle was issued.
    #[error("invalid handle {0}")]
    InvalidHandle(Handle),
    /// The root submix cannot take part in the requested operation.
    #[error("the root submix cannot be {0}")]
    RootSubmix(&'static str),
    #[error("{0} cannot route into itself")]
    SelfRoute(Handle),
    #[error("{from} already routes into {to}")]
    DuplicateRoute { from: Handle, to: Handle },
    #[error("{from} does not route into {to}")]
    RouteNotFound { from: Handle, to: Handle },
    /// A submix may only feed submixes processed after it.
    #[error("{from} (stage {from_stage}) cannot feed {to} (stage {to_stage})")]
    StageOrder {
        from: Handle,
        from_stage: u32,
        to: Handle,
        to_stage: u32,
    },
    #[error("no processing stage left below stage {0}")]
    StageExhausted(u32),
    #[error("{kind} table is full ({capacity} slots)")]
    CapacityExhausted { kind: HandleKind, capacity: usize },
    #[error("unknown sample `{0}`")]
    UnknownSample(String),
    #[error("unsupported sample format `{0}`")]
    UnsupportedFormat(String),
    #[error("effect index {index} is out of range for a chain of {len}")]
    EffectIndexOutOfRange { index: usize, len: usize },
    #[error("no {0} effect on this submix")]
    EffectNotFound(EffectKind),
    #[error("effect {index} is a {found} effect, expected {expected}")]
    EffectKindMismatch {
        index: usize,
        expected: EffectKind,
        found: EffectKind,
    },
    #[error("{0} parameters are read-only")]
    ReadOnlyEffect(EffectKind),
    /// The render backend refused a command.
    #[error("render backend failed to {operation}: {reason}")]
    Backend {
        operation: &'static str,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("graph invariant violated: {0}")]
    Invariant(String),
    /// Free-form error used by glue code such as the command line runner.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Failure while decoding a WAV file.
    #[error("{0}")]
    Decode(#[from] hound::Error),
}

impl VoiceGraphError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates a backend error for the named operation.
    pub fn backend<T: Into<String>>(operation: &'static str, reason: T) -> Self {
        Self::Backend {
            operation,
            reason: reason.into(),
        }
    }
}

impl From<&str> for VoiceGraphError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VoiceGraphError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
