//! Error taxonomy shared by the archive, differ, impact engine and manager.
//!
//! Everything here is recoverable by the caller (retry with corrected input,
//! pick a new version, fix template values) except `Storage`, which is
//! propagated from the backend untouched.

use std::fmt;

pub type Result<T> = std::result::Result<T, AtfError>;

/// What a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Feed,
    Version,
    Item,
    Signature,
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Feed => write!(f, "feed"),
            Missing::Version => write!(f, "version"),
            Missing::Item => write!(f, "item"),
            Missing::Signature => write!(f, "signature"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AtfError {
    #[error("{what} not found: {key}")]
    NotFound { what: Missing, key: String },

    #[error("version {version} already archived for feed {feed_id}")]
    DuplicateVersion { feed_id: String, version: String },

    #[error("unknown impact template: {name}{}", suggestion_suffix(.suggestion))]
    UnknownTemplate {
        name: String,
        suggestion: Option<String>,
    },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for field {field}: {reason}")]
    FieldValidation { field: String, reason: String },

    #[error("item already exists: {0}")]
    ItemExists(String),

    #[error("invalid archive key {0:?}: expected [A-Za-z0-9][A-Za-z0-9._-]*")]
    InvalidKey(String),

    #[error("invalid feed document: {0}")]
    InvalidDocument(String),

    #[error("xml: {0}")]
    Xml(String),

    #[error("signing: {0}")]
    Signing(String),

    #[error("storage: {0}")]
    Storage(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl AtfError {
    pub fn not_found(what: Missing, key: impl Into<String>) -> Self {
        AtfError::NotFound {
            what,
            key: key.into(),
        }
    }

    pub fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AtfError::FieldValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AtfError::NotFound { .. })
    }
}

fn suggestion_suffix(s: &Option<String>) -> String {
    match s {
        Some(name) => format!(" (did you mean {name:?}?)"),
        None => String::new(),
    }
}
