/// Errors that can occur while decoding attribute commands.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The line does not start with `ATT+`.
    #[error("missing ATT+ prefix: {0:?}")]
    MissingPrefix(String),

    /// The attribute tag between `ATT+` and `=` is empty.
    #[error("empty attribute tag: {0:?}")]
    EmptyAttribute(String),

    /// The line failed the grammar registered for its attribute.
    #[error("line rejected by {attribute} grammar: {line:?}")]
    GrammarMismatch { attribute: String, line: String },
}

pub type Result<T> = std::result::Result<T, FrameError>;
