//! External collaborator interfaces.
//!
//! The resource query API and the forwarding control API are external
//! systems. This module defines the traits the orchestrator programs
//! against; concrete transports live with the embedding application.

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resources::{PodSummary, ServiceSummary};

/// Result type alias for calls against the external APIs.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Errors surfaced by the external resource and control APIs.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport or authentication failure reaching the backend.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend received the request and rejected it (unready pod,
    /// busy port, etc.). The message is meant for the user as-is.
    #[error("{0}")]
    Rejected(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,
}

/// Read access to cluster resources.
pub trait ResourceClient: Send + Sync {
    /// Lists pods in a namespace filtered by a label selector string
    /// (comma-joined `key=value` pairs).
    fn list_pods(
        &self,
        cluster: &str,
        namespace: &str,
        label_selector: &str,
    ) -> impl Future<Output = ApiResult<Vec<PodSummary>>> + Send;

    /// Fetches a single service by namespace and name.
    fn get_service(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = ApiResult<ServiceSummary>> + Send;
}

/// Request to start a forwarding session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartForwardRequest {
    pub cluster: String,
    pub namespace: String,
    pub pod: String,
    pub service: String,
    pub service_namespace: String,
    pub target_port: String,
    /// Proposed local port. Omitted to let the backend allocate one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Backend acknowledgement of a started session.
///
/// These fields are authoritative and unconditionally replace any
/// client-proposed values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartForwardResponse {
    pub id: String,
    pub port: u16,
    pub target_port: String,
    pub pod: String,
}

/// Control surface of the forwarding backend that owns the actual tunnel.
pub trait ForwardControl: Send + Sync {
    /// Starts a forwarding session. The response assigns the session id
    /// and the effective local port.
    fn start_port_forward(
        &self,
        request: &StartForwardRequest,
    ) -> impl Future<Output = ApiResult<StartForwardResponse>> + Send;

    /// Tears down a session on the backend, releasing the held socket.
    fn stop_port_forward(&self, id: &str) -> impl Future<Output = ApiResult<()>> + Send;

    /// Local URL serving the forwarded port. The URL template is owned
    /// by the backend.
    fn forward_url(&self, port: u16) -> String;

    /// Opens the forwarded port's URL in the default browser.
    fn open_in_browser(&self, port: u16) -> impl Future<Output = ApiResult<()>> + Send;
}
