//! Kubeforward Core Library
//!
//! Session management for exposing a single container port of a
//! cluster-internal service on a local machine port. Provides:
//! - Label-selector resolution of the pods backing a service, with
//!   readiness computed per pod
//! - Advisory local port allocation outside a reserved set
//! - A generation-guarded dialog state machine covering the forwarding
//!   lifecycle (Idle → Resolving → Ready → Starting → Active → Closed)
//! - An orchestrator composing the above with the forwarding backend
//!
//! The actual network tunnel is owned by an external backend reached
//! through [`client::ForwardControl`]; this crate resolves targets,
//! validates confirms, and tracks the asynchronous lifecycle around it.
//! Cluster resources are read through [`client::ResourceClient`].

pub mod allocator;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod resources;
pub mod selector;
pub mod session;

// Re-export commonly used types
pub use cache::TtlCache;
pub use client::{
    ApiError, ApiResult, ForwardControl, ResourceClient, StartForwardRequest, StartForwardResponse,
};
pub use config::{Settings, SettingsStore};
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
pub use registry::SessionRegistry;
pub use resources::{
    CandidatePod, PodSummary, Selector, ServicePort, ServiceSummary, TargetPort,
};
pub use selector::{default_candidate, resolve};
pub use session::{DialogTarget, ForwardDialog, PortForwardSession, SessionState, StartIntent};
