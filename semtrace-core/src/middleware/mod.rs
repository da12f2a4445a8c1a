//! Axum middleware: the tracing interceptor (C1-C6) and the request-id
//! layers that feed it.

pub mod request_tracking;
pub mod tracer;

pub use request_tracking::{
    request_id_layer, request_id_propagation_layer, sensitive_headers_layer, RequestTrackingConfig,
    PROPAGATE_HEADERS, SENSITIVE_HEADERS,
};
pub use tracer::{trace_middleware, Tracer};
