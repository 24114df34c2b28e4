//! Errors raised while loading a machine description.
//!
//! Every variant maps to exit code 1; usage errors never reach this type.

use std::fmt;
use std::path::PathBuf;

use membus_core::MemoryError;

/// Failure to load, build or query a machine description.
#[derive(Debug)]
pub enum CliError {
    /// The description file could not be read.
    Io {
        /// File that was opened.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The description is not valid JSON or does not match the expected shape.
    Json(serde_json::Error),
    /// A numeric field holds a string that is not a decimal or `0x` hex number.
    Number {
        /// Field name.
        field: String,
        /// Text that failed to parse.
        text: String,
    },
    /// A space declares a data width other than 8, 16, 32 or 64.
    DataWidth {
        /// Space name.
        space: String,
        /// Declared width.
        bits: u32,
    },
    /// A command named a space the description does not declare.
    UnknownSpace(String),
    /// The description declares no space at all.
    NoSpaces,
    /// The engine rejected the description.
    Memory(MemoryError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Json(e) => write!(f, "invalid machine description: {e}"),
            Self::Number { field, text } => {
                write!(f, "field '{field}': '{text}' is not a number")
            }
            Self::DataWidth { space, bits } => {
                write!(f, "space '{space}': unsupported data width {bits}")
            }
            Self::UnknownSpace(name) => write!(f, "unknown space '{name}'"),
            Self::NoSpaces => write!(f, "machine description declares no spaces"),
            Self::Memory(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json(e) => Some(e),
            Self::Memory(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<MemoryError> for CliError {
    fn from(e: MemoryError) -> Self {
        Self::Memory(e)
    }
}

#[cfg(test)]
mod tests {
    use super::CliError;

    #[test]
    fn messages_name_the_offending_item() {
        let error = CliError::DataWidth {
            space: "io".to_string(),
            bits: 12,
        };
        assert_eq!(error.to_string(), "space 'io': unsupported data width 12");
        assert_eq!(
            CliError::UnknownSpace("audio".to_string()).to_string(),
            "unknown space 'audio'"
        );
    }
}
