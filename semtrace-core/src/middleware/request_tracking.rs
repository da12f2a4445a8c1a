//! Request tracking layers for distributed tracing.
//!
//! Provides the `tower_http` layers that mint and propagate the operation ID
//! header before the tracing middleware ever sees the request.

use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    sensitive_headers::SetSensitiveRequestHeadersLayer,
};

use crate::ids::{MakeOperationId, OPERATION_ID_HEADER};

/// Headers propagated between services for a single workflow.
pub const PROPAGATE_HEADERS: &[&str] = &[
    "x-operation-id",
    "x-correlation-id",
    "x-parent-operation-id",
];

/// Sensitive headers masked before they reach any logging layer.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
];

/// Configuration for request tracking.
#[derive(Debug, Clone)]
pub struct RequestTrackingConfig {
    pub request_id_enabled: bool,
    pub propagate_headers: bool,
    pub mask_sensitive_headers: bool,
}

impl Default for RequestTrackingConfig {
    fn default() -> Self {
        Self { request_id_enabled: true, propagate_headers: true, mask_sensitive_headers: true }
    }
}

/// Create a layer that mints a fresh operation ID for every inbound request.
pub fn request_id_layer() -> SetRequestIdLayer<MakeOperationId> {
    SetRequestIdLayer::new(OPERATION_ID_HEADER.parse().expect("valid header name"), MakeOperationId)
}

/// Create a layer that propagates the operation ID header onto the response.
pub fn request_id_propagation_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(OPERATION_ID_HEADER.parse().expect("valid header name"))
}

/// Create a sensitive-headers layer that masks credentials in logs.
pub fn sensitive_headers_layer() -> SetSensitiveRequestHeadersLayer {
    let headers = SENSITIVE_HEADERS.iter().map(|h| h.parse().expect("valid header name")).collect::<Vec<_>>();
    SetSensitiveRequestHeadersLayer::new(headers)
}
