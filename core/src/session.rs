//! Forwarding session lifecycle.
//!
//! [`ForwardDialog`] owns one session's life from selector resolution
//! through teardown. Async outcomes (resolution, start) are applied
//! through generation-checked methods: `begin` and `reset` bump a
//! monotonically increasing generation, and an outcome carrying a stale
//! generation is discarded instead of mutating a superseded dialog.
//! This guards the classic stale-response race when a dialog is closed
//! while a call is in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::client::StartForwardResponse;
use crate::error::{Error, Result};
use crate::resources::{CandidatePod, ServicePort, TargetPort};
use crate::selector::default_candidate;

// ============================================================================
// Session State
// ============================================================================

/// Lifecycle state of a forwarding session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Idle,
    Resolving,
    Ready,
    Starting,
    Active,
    Closed,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Ready => "ready",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Session Record
// ============================================================================

/// One tracked forwarding session.
///
/// `id`, `local_port`, `target_port` and `pod_name` are assigned by the
/// forwarding backend once the session reaches Active; anything proposed
/// locally before that is provisional and gets overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForwardSession {
    pub id: String,
    pub cluster: String,
    pub namespace: String,
    pub pod_name: String,
    pub service_name: String,
    pub target_port: String,
    pub local_port: u16,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// The (service, namespace, cluster) triple a dialog was opened for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogTarget {
    pub service: String,
    pub namespace: String,
    pub cluster: String,
}

/// Validated confirm-time inputs, extracted before the Starting
/// transition is committed.
#[derive(Debug, Clone)]
pub struct StartIntent {
    pub target: DialogTarget,
    pub pod: String,
    pub target_port: TargetPort,
    pub local_port: Option<u16>,
}

// ============================================================================
// Forward Dialog
// ============================================================================

/// State of the port-forward dialog, from selector resolution through an
/// active session.
#[derive(Debug, Default)]
pub struct ForwardDialog {
    state: SessionState,
    generation: u64,
    target: Option<DialogTarget>,
    candidates: Vec<CandidatePod>,
    service_ports: Vec<ServicePort>,
    selected_pod: Option<String>,
    selected_target_port: Option<TargetPort>,
    proposed_local_port: Option<u16>,
    session: Option<PortForwardSession>,
    error_message: Option<String>,
}

impl ForwardDialog {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current generation. Outcomes tagged with an older value are
    /// discarded by the `apply_*` methods.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn target(&self) -> Option<&DialogTarget> {
        self.target.as_ref()
    }

    pub fn candidates(&self) -> &[CandidatePod] {
        &self.candidates
    }

    /// Ports exposed by the targeted service, for selection display.
    pub fn service_ports(&self) -> &[ServicePort] {
        &self.service_ports
    }

    pub fn selected_pod(&self) -> Option<&str> {
        self.selected_pod.as_deref()
    }

    pub fn selected_target_port(&self) -> Option<&TargetPort> {
        self.selected_target_port.as_ref()
    }

    pub fn proposed_local_port(&self) -> Option<u16> {
        self.proposed_local_port
    }

    pub fn session(&self) -> Option<&PortForwardSession> {
        self.session.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Opens the dialog for a concrete (service, namespace, cluster)
    /// triple and enters Resolving. Returns the generation that the
    /// eventual resolution outcome must carry.
    pub fn begin(
        &mut self,
        service: impl Into<String>,
        namespace: impl Into<String>,
        cluster: impl Into<String>,
    ) -> u64 {
        self.clear_session_fields();
        self.target = Some(DialogTarget {
            service: service.into(),
            namespace: namespace.into(),
            cluster: cluster.into(),
        });
        self.state = SessionState::Resolving;
        self.generation += 1;
        self.generation
    }

    /// Applies a successful resolution: Resolving → Ready, with the
    /// default pod selected per the tie-break (first ready pod, else
    /// first in API order).
    ///
    /// Returns false when the outcome is stale (generation mismatch or
    /// dialog no longer Resolving) and was discarded.
    pub fn apply_candidates(
        &mut self,
        generation: u64,
        pods: Vec<CandidatePod>,
        service_ports: Vec<ServicePort>,
    ) -> bool {
        if !self.accepts(generation, SessionState::Resolving) {
            return false;
        }
        self.selected_pod = default_candidate(&pods).map(|p| p.name.clone());
        // Preselect the first service port; the user can still change it.
        self.selected_target_port = service_ports.first().map(|p| p.target_port.clone());
        self.candidates = pods;
        self.service_ports = service_ports;
        self.error_message = None;
        self.state = SessionState::Ready;
        true
    }

    /// Applies a failed resolution: Resolving → Error. Returns false
    /// when the outcome is stale and was discarded.
    pub fn apply_resolve_error(&mut self, generation: u64, error: &Error) -> bool {
        if !self.accepts(generation, SessionState::Resolving) {
            return false;
        }
        self.error_message = Some(error.to_string());
        self.state = SessionState::Error;
        true
    }

    /// Selects a candidate pod by name.
    pub fn select_pod(&mut self, name: &str) -> Result<()> {
        self.ensure_selectable()?;
        if !self.candidates.iter().any(|p| p.name == name) {
            return Err(Error::Validation(format!(
                "no candidate pod named '{}'",
                name
            )));
        }
        self.selected_pod = Some(name.to_string());
        Ok(())
    }

    /// Selects the container port to forward to.
    pub fn select_target_port(&mut self, port: TargetPort) -> Result<()> {
        self.ensure_selectable()?;
        self.selected_target_port = Some(port);
        Ok(())
    }

    /// Proposes a local port, or clears the proposal to delegate
    /// allocation to the backend. Range and collision checks happen at
    /// confirm time.
    pub fn select_local_port(&mut self, port: Option<u16>) -> Result<()> {
        self.ensure_selectable()?;
        self.proposed_local_port = port;
        Ok(())
    }

    /// Validates confirm-time inputs without committing any transition.
    ///
    /// Fails with a validation error when the dialog is not awaiting a
    /// confirm, or when pod/target-port are unset.
    pub fn start_intent(&self) -> Result<StartIntent> {
        match self.state {
            SessionState::Ready | SessionState::Error => {}
            SessionState::Starting => {
                return Err(Error::Validation("start already in progress".to_string()))
            }
            other => {
                return Err(Error::Validation(format!(
                    "cannot start from state '{}'",
                    other
                )))
            }
        }

        let target = self
            .target
            .clone()
            .ok_or_else(|| Error::Validation("no service targeted".to_string()))?;
        let pod = self
            .selected_pod
            .clone()
            .ok_or_else(|| Error::Validation("no pod selected".to_string()))?;
        let target_port = self
            .selected_target_port
            .clone()
            .ok_or_else(|| Error::Validation("no target port selected".to_string()))?;

        Ok(StartIntent {
            target,
            pod,
            target_port,
            local_port: self.proposed_local_port,
        })
    }

    /// Commits Ready/Error → Starting. Returns the generation that the
    /// start outcome must carry. The caller must have validated the
    /// intent first.
    pub fn mark_starting(&mut self) -> u64 {
        self.error_message = None;
        self.state = SessionState::Starting;
        self.generation
    }

    /// Applies a successful start: Starting → Active. The backend's
    /// id/port/targetPort/pod replace any locally proposed values.
    ///
    /// Returns the session record to track, or None when the outcome is
    /// stale and was discarded.
    pub fn apply_start(
        &mut self,
        generation: u64,
        response: StartForwardResponse,
    ) -> Option<PortForwardSession> {
        if !self.accepts(generation, SessionState::Starting) {
            return None;
        }
        let target = self.target.clone()?;

        let session = PortForwardSession {
            id: response.id,
            cluster: target.cluster.clone(),
            namespace: target.namespace.clone(),
            pod_name: response.pod,
            service_name: target.service.clone(),
            target_port: response.target_port,
            local_port: response.port,
            state: SessionState::Active,
            created_at: Utc::now(),
            error_message: None,
        };
        self.session = Some(session.clone());
        self.error_message = None;
        self.state = SessionState::Active;
        Some(session)
    }

    /// Applies a failed start: Starting → Error. Selections are kept so
    /// the user can retry the confirm. Returns false when the outcome is
    /// stale and was discarded.
    pub fn apply_start_error(&mut self, generation: u64, error: &Error) -> bool {
        if !self.accepts(generation, SessionState::Starting) {
            return false;
        }
        self.error_message = Some(error.to_string());
        self.state = SessionState::Error;
        true
    }

    /// Closes the active session: Active → Closed. This is a purely
    /// local transition; the caller removes the session from the
    /// registry. Returns the closed session record.
    pub fn close(&mut self) -> Option<PortForwardSession> {
        if self.state != SessionState::Active {
            return None;
        }
        self.state = SessionState::Closed;
        if let Some(session) = self.session.as_mut() {
            session.state = SessionState::Closed;
        }
        self.session.clone()
    }

    /// Fully resets the dialog to Idle, discarding all session-scoped
    /// fields. The generation bump makes any in-flight outcome stale.
    pub fn reset(&mut self) {
        self.clear_session_fields();
        self.target = None;
        self.state = SessionState::Idle;
        self.generation += 1;
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    fn accepts(&self, generation: u64, expected: SessionState) -> bool {
        generation == self.generation && self.state == expected
    }

    fn ensure_selectable(&self) -> Result<()> {
        match self.state {
            SessionState::Ready | SessionState::Error => Ok(()),
            other => Err(Error::Validation(format!(
                "dialog is not awaiting selection (state '{}')",
                other
            ))),
        }
    }

    fn clear_session_fields(&mut self) {
        self.candidates.clear();
        self.service_ports.clear();
        self.selected_pod = None;
        self.selected_target_port = None;
        self.proposed_local_port = None;
        self.session = None;
        self.error_message = None;
    }
}

// ============================================================================
// Tests
// ============================================================================
