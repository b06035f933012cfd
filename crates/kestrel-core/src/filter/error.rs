use thiserror::Error;

/// Errors produced while parsing a filter expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// The filter text is malformed. `fragment` is the slice of input at the
    /// point the parser gave up.
    #[error("invalid filter near '{fragment}': {message}")]
    Invalid { fragment: String, message: String },
}

impl FilterError {
    pub(crate) fn invalid(fragment: impl Into<String>, message: impl Into<String>) -> Self {
        FilterError::Invalid {
            fragment: fragment.into(),
            message: message.into(),
        }
    }
}
