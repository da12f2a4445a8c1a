//! Correlation and operation identifiers (C1).
//!
//! Every traced action carries two identifiers: a correlation ID shared by
//! every action in a single workflow, and an operation ID unique to one
//! action. Both are short, prefixed, hex-suffixed strings so they read
//! cleanly in logs and headers without pulling in a full type-ID codec.

use std::fmt;
use std::str::FromStr;

use tower_http::request_id::{MakeRequestId, RequestId as TowerRequestId};
use uuid::Uuid;

/// Header carrying the workflow-scoped correlation ID.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
/// Header carrying this hop's operation ID.
pub const OPERATION_ID_HEADER: &str = "x-operation-id";
/// Header carrying the operation ID of the request that triggered this hop.
pub const PARENT_OPERATION_ID_HEADER: &str = "x-parent-operation-id";

fn hex8() -> String {
    let u = Uuid::new_v4();
    u.simple().to_string()[..8].to_string()
}

/// Error returned when parsing a correlation or operation ID fails.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("invalid prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix { expected: &'static str, actual: String },

    #[error("malformed identifier: '{0}'")]
    Malformed(String),
}

macro_rules! define_id {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            #[must_use]
            pub fn new() -> Self {
                Self(format!("{}-{}", Self::PREFIX, hex8()))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let (prefix, rest) = s
                    .split_once('-')
                    .ok_or_else(|| IdParseError::Malformed(s.to_string()))?;
                if prefix != Self::PREFIX {
                    return Err(IdParseError::InvalidPrefix {
                        expected: Self::PREFIX,
                        actual: prefix.to_string(),
                    });
                }
                if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(IdParseError::Malformed(s.to_string()));
                }
                Ok(Self(s.to_string()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(CorrelationId, "wf", "Workflow-scoped correlation identifier, shape `wf-<8-hex>`.");
define_id!(OperationId, "op", "Action-scoped operation identifier, shape `op-<8-hex>`.");

impl CorrelationId {
    /// Wrap a caller-supplied value verbatim, without validating its shape.
    /// `wf-<hex>` is the shape this crate mints, but an incoming header is
    /// not required to match it (§6.1).
    fn from_raw(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Resolve (or mint) the correlation ID for an incoming request from its
/// header value, preserving it verbatim when present.
pub fn resolve_correlation_id(header_value: Option<&str>) -> CorrelationId {
    match header_value {
        Some(v) => CorrelationId::from_raw(v),
        None => CorrelationId::new(),
    }
}

/// A [`MakeRequestId`] implementation that mints operation IDs for
/// `tower_http`'s request-id layer, reusing the correlation/operation header
/// plumbing rather than a generic opaque request id.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeOperationId;

impl MakeRequestId for MakeOperationId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<TowerRequestId> {
        let id = OperationId::new();
        let header_value = http::HeaderValue::from_str(id.as_str()).ok()?;
        Some(TowerRequestId::new(header_value))
    }
}
