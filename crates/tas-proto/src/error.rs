//! Error types for the lobby protocol library.

use thiserror::Error;

/// Convenience type alias for Results using [`ProtocolError`].
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Errors produced while marshalling or unmarshalling protocol data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The line contained no command name.
    #[error("empty command line")]
    EmptyLine,

    /// A `#<id>` correlation prefix that is not a decimal number.
    #[error("malformed correlation prefix: {0:?}")]
    BadPrefix(String),

    /// The command name contains characters outside `[A-Za-z0-9_]`.
    #[error("invalid command name: {0:?}")]
    BadCommandName(String),

    /// A word argument carries whitespace and cannot be framed.
    #[error("word argument contains whitespace: {0:?}")]
    IllegalWord(String),

    /// A sentence argument carries a TAB or line break.
    #[error("sentence argument contains TAB or line break: {0:?}")]
    IllegalSentence(String),

    /// A numeric wire field did not parse as an integer.
    #[error("field {field} is not an integer: {value:?}")]
    BadInteger {
        /// Name of the offending field.
        field: &'static str,
        /// The raw token that failed to parse.
        value: String,
    },

    /// A structured field holds a value the wire encoding cannot carry.
    #[error("field {field} out of range: {value}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = ProtocolError::BadInteger {
            field: "battleStatus",
            value: "soon".into(),
        };
        assert_eq!(e.to_string(), "field battleStatus is not an integer: \"soon\"");
    }
}
