//! Error types for the subscription core.
//!
//! Protocol-level rejections (481/500/501) are not represented here — they
//! are successful completions of dispatch that happen to produce a negative
//! SIP response, sent through [`crate::collaborator::DialogCollaborator::reply`].
//! `SubscriptionError` is reserved for conditions a caller embedding this
//! core would want to handle as a `Result`, not a wire-level outcome.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// Errors produced by the subscription core.
#[derive(Debug, Error, Clone)]
pub enum SubscriptionError {
    #[error("cannot create a subscription from method {method}")]
    NonCreatingMethod { method: String },

    #[error("malformed {header} header: {value}")]
    MalformedHeader { header: String, value: String },

    #[error("no subscription matches (role={role:?}, event={event}, id={id})")]
    NoMatch {
        role: crate::message::Role,
        event: String,
        id: String,
    },
}

impl SubscriptionError {
    pub fn non_creating_method(method: impl Into<String>) -> Self {
        Self::NonCreatingMethod {
            method: method.into(),
        }
    }

    pub fn malformed_header(header: impl Into<String>, value: impl Into<String>) -> Self {
        Self::MalformedHeader {
            header: header.into(),
            value: value.into(),
        }
    }

    pub fn no_match(role: crate::message::Role, event: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NoMatch {
            role,
            event: event.into(),
            id: id.into(),
        }
    }
}
