/// Result alias that carries the custom [`BindingError`] type.
pub type Result<T> = std::result::Result<T, BindingError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    /// Free-form message for failures that do not deserve their own variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// A binding document or config file could not be (de)serialized.
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),
    /// The MIDI port is no longer open. The engine tears itself down on this.
    #[error("MIDI port is closed")]
    DeviceClosed,
    /// The MIDI driver reported a failure.
    #[error("MIDI device error: {0}")]
    Device(String),
    #[error("MIDI port {index} does not exist ({available} available)")]
    PortOutOfRange { index: usize, available: usize },
    #[error("unknown entity `{0}`")]
    UnknownEntity(String),
    /// The entity exists but no longer carries the property (e.g. after a rig change).
    #[error("entity `{entity}` has no property `{property}`")]
    MissingAttribute { entity: String, property: String },
    #[error("binding document is missing the `{0}` section")]
    MissingSection(&'static str),
    #[error("no property change is waiting to be mapped")]
    NoPendingMapping,
    #[error("control {control} has no mapping at index {index}")]
    UnknownMapping { control: u8, index: usize },
    #[error("frame control resolution must be at least 1")]
    InvalidResolution,
}

impl BindingError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Errors scoped to a single read, write or message. Callers log these and
    /// carry on with the rest of the tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Device(_) | Self::UnknownEntity(_) | Self::MissingAttribute { .. }
        )
    }
}

impl From<&str> for BindingError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for BindingError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
