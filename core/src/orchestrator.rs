//! User-facing commands for the forwarding dialog.
//!
//! Composes selector resolution, advisory port allocation, the dialog
//! state machine, the session registry, and the external forwarding
//! backend. Every command maps failures to the crate error taxonomy and
//! retries nothing; the user re-invokes the corresponding command.

use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::allocator;
use crate::cache::TtlCache;
use crate::client::{ApiError, ForwardControl, ResourceClient, StartForwardRequest};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::registry::SessionRegistry;
use crate::resources::{CandidatePod, ServicePort, ServiceSummary, TargetPort};
use crate::selector;
use crate::session::{ForwardDialog, PortForwardSession, SessionState};

/// Cache key for service lookups: (cluster, namespace, name).
type ServiceKey = (String, String, String);

/// Drives one port-forward dialog against the external APIs.
///
/// All commands run on one logical thread; the only suspension points
/// are the resource queries and the backend start/stop calls. Outcomes
/// of those calls are applied through the dialog's generation guard, so
/// a response that arrives after a reset is discarded.
pub struct Orchestrator<R, F> {
    resources: R,
    control: F,
    settings: Settings,
    registry: Arc<SessionRegistry>,
    services: TtlCache<ServiceKey, ServiceSummary>,
    dialog: ForwardDialog,
}

impl<R: ResourceClient, F: ForwardControl> Orchestrator<R, F> {
    pub fn new(resources: R, control: F, settings: Settings) -> Result<Self> {
        Self::with_registry(resources, control, settings, Arc::new(SessionRegistry::new()))
    }

    /// Builds an orchestrator sharing a process-wide registry, so
    /// local-port collision checks see sessions from other dialogs.
    ///
    /// Fails when the settings' port range is inconsistent.
    pub fn with_registry(
        resources: R,
        control: F,
        settings: Settings,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self> {
        settings.validate()?;
        let services = TtlCache::new(settings.service_cache_ttl());
        Ok(Self {
            resources,
            control,
            settings,
            registry,
            services,
            dialog: ForwardDialog::new(),
        })
    }

    pub fn dialog(&self) -> &ForwardDialog {
        &self.dialog
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> Vec<PortForwardSession> {
        self.registry.all()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Opens the dialog for a (service, namespace, cluster) triple and
    /// resolves the candidate pods backing the service.
    pub async fn open_dialog(
        &mut self,
        service: &str,
        namespace: &str,
        cluster: &str,
    ) -> Result<()> {
        let generation = self.dialog.begin(service, namespace, cluster);
        debug!(service, namespace, cluster, "opening port-forward dialog");

        match self.resolve_target(service, namespace, cluster).await {
            Ok((pods, ports)) => {
                self.dialog.apply_candidates(generation, pods, ports);
                Ok(())
            }
            Err(error) => {
                self.dialog.apply_resolve_error(generation, &error);
                Err(error)
            }
        }
    }

    /// Selects a candidate pod by name.
    pub fn select_pod(&mut self, name: &str) -> Result<()> {
        self.dialog.select_pod(name)
    }

    /// Selects the container port to forward to.
    pub fn select_target_port(&mut self, port: TargetPort) -> Result<()> {
        self.dialog.select_target_port(port)
    }

    /// Proposes a local port, or clears the proposal so the backend
    /// allocates one.
    pub fn select_local_port(&mut self, port: Option<u16>) -> Result<()> {
        self.dialog.select_local_port(port)
    }

    /// Draws an advisory local port candidate from the configured range,
    /// outside the reserved set. Only called from an explicit "suggest"
    /// affordance, never implicitly.
    pub fn suggest_local_port(&self) -> u16 {
        allocator::generate_candidate(
            &self.settings.exclusions(),
            self.settings.local_port_min,
            self.settings.local_port_max,
        )
    }

    /// Confirms the selected pod and target port and asks the backend to
    /// start forwarding.
    ///
    /// Fails with a validation error, without any state transition, when
    /// pod or target port is unset, when a proposed local port is out of
    /// range, or when it collides with a tracked Active session. The
    /// proposed port is not checked against OS-level availability; the
    /// backend's response is authoritative.
    pub async fn confirm_start(&mut self) -> Result<PortForwardSession> {
        let intent = self.dialog.start_intent()?;

        if let Some(port) = intent.local_port {
            if port < self.settings.local_port_min || port > self.settings.local_port_max {
                return Err(Error::Validation(format!(
                    "local port {} is outside [{}, {}]",
                    port, self.settings.local_port_min, self.settings.local_port_max
                )));
            }
            if self.registry.active_local_port_in_use(port) {
                return Err(Error::Validation(format!(
                    "local port {} is already forwarded by another active session",
                    port
                )));
            }
        }

        let generation = self.dialog.mark_starting();

        let request = StartForwardRequest {
            cluster: intent.target.cluster,
            namespace: intent.target.namespace.clone(),
            pod: intent.pod,
            service: intent.target.service,
            service_namespace: intent.target.namespace,
            target_port: intent.target_port.to_string(),
            port: intent.local_port,
        };
        debug!(
            service = %request.service,
            pod = %request.pod,
            target_port = %request.target_port,
            proposed_port = ?request.port,
            "starting port-forward"
        );

        let start_timeout = self.settings.start_timeout();
        let outcome = match timeout(start_timeout, self.control.start_port_forward(&request)).await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(ApiError::Rejected(message))) => Err(Error::StartFailed(message)),
            Ok(Err(error)) => Err(Error::StartFailed(error.to_string())),
            Err(_) => Err(Error::StartTimeout(start_timeout)),
        };

        match outcome {
            Ok(response) => match self.dialog.apply_start(generation, response) {
                Some(session) => {
                    self.registry.insert(session.clone())?;
                    debug!(id = %session.id, local_port = session.local_port, "port-forward active");
                    Ok(session)
                }
                None => {
                    warn!("discarding start response for a superseded dialog");
                    Err(Error::Unknown(
                        "start response arrived for a superseded dialog".to_string(),
                    ))
                }
            },
            Err(error) => {
                self.dialog.apply_start_error(generation, &error);
                Err(error)
            }
        }
    }

    /// Stops the active session: local Closed transition and registry
    /// removal, then a best-effort backend teardown whose failure is
    /// logged rather than surfaced.
    pub async fn stop(&mut self) -> Result<()> {
        self.close_active_session()
            .await
            .map(|_| ())
            .ok_or_else(|| Error::Validation("no active session to stop".to_string()))
    }

    /// URL serving the active session's local port.
    pub fn session_url(&self) -> Result<String> {
        let session = self.active_session()?;
        Ok(self.control.forward_url(session.local_port))
    }

    /// Opens the active session's URL in the default browser.
    pub async fn open_in_browser(&self) -> Result<()> {
        let port = self.active_session()?.local_port;
        self.control
            .open_in_browser(port)
            .await
            .map_err(|e| Error::Unknown(e.to_string()))
    }

    /// Resets the dialog to Idle. An active session is closed first, the
    /// same as [`stop`](Self::stop), so its registry entry and local port
    /// are released. In-flight calls are not cancelled; their outcomes
    /// become stale and are discarded on arrival.
    pub async fn reset(&mut self) {
        let _ = self.close_active_session().await;
        self.dialog.reset();
    }

    /// Drops cached service lookups, forcing the next open to refetch.
    pub fn invalidate_service_cache(&self) {
        self.services.clear();
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Closes the active session if there is one: local Closed
    /// transition, registry removal, then a best-effort backend teardown
    /// whose failure is logged rather than surfaced.
    async fn close_active_session(&mut self) -> Option<PortForwardSession> {
        let session = self.dialog.close()?;

        self.registry.remove(&session.id);
        debug!(id = %session.id, "port-forward closed");

        if let Err(error) = self.control.stop_port_forward(&session.id).await {
            warn!(id = %session.id, %error, "backend teardown failed");
        }
        Some(session)
    }

    fn active_session(&self) -> Result<&PortForwardSession> {
        match self.dialog.session() {
            Some(session) if session.state == SessionState::Active => Ok(session),
            _ => Err(Error::Validation("no active session".to_string())),
        }
    }

    async fn resolve_target(
        &self,
        service: &str,
        namespace: &str,
        cluster: &str,
    ) -> Result<(Vec<CandidatePod>, Vec<ServicePort>)> {
        let summary = self.fetch_service(cluster, namespace, service).await?;
        let pods = selector::resolve(&self.resources, &summary.selector, namespace, cluster).await?;
        Ok((pods, summary.ports))
    }

    async fn fetch_service(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> Result<ServiceSummary> {
        let key = (
            cluster.to_string(),
            namespace.to_string(),
            name.to_string(),
        );
        if let Some(summary) = self.services.get(&key) {
            return Ok(summary);
        }

        let summary = self
            .resources
            .get_service(cluster, namespace, name)
            .await
            .map_err(|e| Error::ResolutionFailed(e.to_string()))?;
        self.services.put(key, summary.clone());
        Ok(summary)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::client::{ApiResult, StartForwardResponse};
    use crate::resources::{ContainerStatus, PodSummary, Selector};

    struct FakeResources {
        service: ServiceSummary,
        pods: Vec<PodSummary>,
        service_calls: AtomicUsize,
        pod_calls: AtomicUsize,
    }

    impl FakeResources {
        fn new(service: ServiceSummary, pods: Vec<PodSummary>) -> Self {
            Self {
                service,
                pods,
                service_calls: AtomicUsize::new(0),
                pod_calls: AtomicUsize::new(0),
            }
        }
    }

    impl ResourceClient for FakeResources {
        async fn list_pods(
            &self,
            _cluster: &str,
            _namespace: &str,
            _label_selector: &str,
        ) -> ApiResult<Vec<PodSummary>> {
            self.pod_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pods.clone())
        }

        async fn get_service(
            &self,
            _cluster: &str,
            _namespace: &str,
            _name: &str,
        ) -> ApiResult<ServiceSummary> {
            self.service_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.service.clone())
        }
    }

    enum StartBehavior {
        Succeed(StartForwardResponse),
        Reject(String),
        Hang,
    }

    struct FakeControl {
        behavior: StartBehavior,
        requests: Mutex<Vec<StartForwardRequest>>,
        stopped: Mutex<Vec<String>>,
        opened: Mutex<Vec<u16>>,
    }

    impl FakeControl {
        fn new(behavior: StartBehavior) -> Self {
            Self {
                behavior,
                requests: Mutex::new(Vec::new()),
                stopped: Mutex::new(Vec::new()),
                opened: Mutex::new(Vec::new()),
            }
        }

        fn succeeding() -> Self {
            Self::new(StartBehavior::Succeed(StartForwardResponse {
                id: "abc".to_string(),
                port: 54321,
                target_port: "8080".to_string(),
                pod: "p1".to_string(),
            }))
        }
    }

    impl ForwardControl for FakeControl {
        async fn start_port_forward(
            &self,
            request: &StartForwardRequest,
        ) -> ApiResult<StartForwardResponse> {
            self.requests.lock().push(request.clone());
            match &self.behavior {
                StartBehavior::Succeed(response) => Ok(response.clone()),
                StartBehavior::Reject(message) => Err(ApiError::Rejected(message.clone())),
                StartBehavior::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn stop_port_forward(&self, id: &str) -> ApiResult<()> {
            self.stopped.lock().push(id.to_string());
            Ok(())
        }

        fn forward_url(&self, port: u16) -> String {
            format!("http://localhost:{}", port)
        }

        async fn open_in_browser(&self, port: u16) -> ApiResult<()> {
            self.opened.lock().push(port);
            Ok(())
        }
    }

    fn pod(name: &str, ready: bool) -> PodSummary {
        PodSummary {
            name: name.to_string(),
            namespace: "default".to_string(),
            labels: Default::default(),
            container_statuses: vec![ContainerStatus {
                name: "main".to_string(),
                ready,
            }],
        }
    }

    fn web_service() -> ServiceSummary {
        ServiceSummary {
            name: "web".to_string(),
            namespace: "default".to_string(),
            selector: [("app", "web")].into_iter().collect(),
            ports: vec![ServicePort {
                name: Some("http".to_string()),
                port: 80,
                target_port: TargetPort::Int(8080),
                protocol: Some("TCP".to_string()),
            }],
        }
    }

    fn orchestrator(
        service: ServiceSummary,
        pods: Vec<PodSummary>,
        control: FakeControl,
    ) -> Orchestrator<FakeResources, FakeControl> {
        Orchestrator::new(
            FakeResources::new(service, pods),
            control,
            Settings::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_dialog_resolves_and_preselects() {
        let mut orch = orchestrator(
            web_service(),
            vec![pod("p1", true), pod("p2", false)],
            FakeControl::succeeding(),
        );

        orch.open_dialog("web", "default", "prod").await.unwrap();
        assert_eq!(orch.dialog().state(), SessionState::Ready);
        assert_eq!(orch.dialog().selected_pod(), Some("p1"));
        assert_eq!(
            orch.dialog().selected_target_port(),
            Some(&TargetPort::Int(8080))
        );
        assert_eq!(orch.dialog().candidates().len(), 2);
    }

    #[tokio::test]
    async fn test_open_dialog_without_selector_skips_pod_query() {
        let mut service = web_service();
        service.selector = Selector::new();
        let mut orch = orchestrator(service, vec![pod("p1", true)], FakeControl::succeeding());

        let result = orch.open_dialog("web", "default", "prod").await;
        assert!(matches!(result, Err(Error::NoSelector)));
        assert_eq!(orch.dialog().state(), SessionState::Error);
        assert_eq!(orch.resources.pod_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_confirm_without_target_port_is_rejected_without_transition() {
        let mut service = web_service();
        service.ports.clear();
        let mut orch = orchestrator(service, vec![pod("p1", true)], FakeControl::succeeding());

        orch.open_dialog("web", "default", "prod").await.unwrap();
        let result = orch.confirm_start().await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(orch.dialog().state(), SessionState::Ready);
        assert!(orch.control.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_start_server_port_wins() {
        let mut orch = orchestrator(
            web_service(),
            vec![pod("p1", true)],
            FakeControl::succeeding(),
        );

        orch.open_dialog("web", "default", "prod").await.unwrap();
        orch.select_local_port(Some(3000)).unwrap();

        let session = orch.confirm_start().await.unwrap();
        assert_eq!(session.id, "abc");
        assert_eq!(session.local_port, 54321);
        assert_eq!(session.state, SessionState::Active);
        assert_eq!(orch.dialog().state(), SessionState::Active);
        assert!(orch.registry().active_local_port_in_use(54321));

        // The proposal went out as a hint, the response won.
        let requests = orch.control.requests.lock();
        assert_eq!(requests[0].port, Some(3000));
        assert_eq!(requests[0].target_port, "8080");
    }

    #[tokio::test]
    async fn test_confirm_start_omits_port_when_not_proposed() {
        let mut orch = orchestrator(
            web_service(),
            vec![pod("p1", true)],
            FakeControl::succeeding(),
        );

        orch.open_dialog("web", "default", "prod").await.unwrap();
        orch.confirm_start().await.unwrap();

        assert_eq!(orch.control.requests.lock()[0].port, None);
    }

    #[tokio::test]
    async fn test_confirm_rejects_out_of_range_local_port() {
        let mut orch = orchestrator(
            web_service(),
            vec![pod("p1", true)],
            FakeControl::succeeding(),
        );

        orch.open_dialog("web", "default", "prod").await.unwrap();
        orch.select_local_port(Some(80)).unwrap();

        let result = orch.confirm_start().await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(orch.dialog().state(), SessionState::Ready);
        assert!(orch.control.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_rejects_local_port_held_by_active_session() {
        let registry = Arc::new(SessionRegistry::new());
        let mut orch = Orchestrator::with_registry(
            FakeResources::new(web_service(), vec![pod("p1", true)]),
            FakeControl::succeeding(),
            Settings::default(),
            registry.clone(),
        )
        .unwrap();

        orch.open_dialog("web", "default", "prod").await.unwrap();
        orch.confirm_start().await.unwrap();
        assert!(registry.active_local_port_in_use(54321));

        // A second dialog proposing the same local port must be refused
        // before any backend call.
        let mut other = Orchestrator::with_registry(
            FakeResources::new(web_service(), vec![pod("p1", true)]),
            FakeControl::succeeding(),
            Settings::default(),
            registry,
        )
        .unwrap();
        other.open_dialog("web", "default", "prod").await.unwrap();
        other.select_local_port(Some(54321)).unwrap();

        let result = other.confirm_start().await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(other.dialog().state(), SessionState::Ready);
        assert!(other.control.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_rejection_surfaces_backend_message() {
        let mut orch = orchestrator(
            web_service(),
            vec![pod("p1", true)],
            FakeControl::new(StartBehavior::Reject("pod not ready".to_string())),
        );

        orch.open_dialog("web", "default", "prod").await.unwrap();
        let result = orch.confirm_start().await;
        match result {
            Err(Error::StartFailed(message)) => assert_eq!(message, "pod not ready"),
            other => panic!("expected StartFailed, got {:?}", other.map(|_| ())),
        }
        assert_eq!(orch.dialog().state(), SessionState::Error);
        assert_eq!(orch.dialog().error_message(), Some("pod not ready"));
        assert!(orch.registry().is_empty());
    }

    #[tokio::test]
    async fn test_start_timeout() {
        let settings = Settings {
            start_timeout_secs: 0,
            ..Settings::default()
        };
        let mut orch = Orchestrator::new(
            FakeResources::new(web_service(), vec![pod("p1", true)]),
            FakeControl::new(StartBehavior::Hang),
            settings,
        )
        .unwrap();

        orch.open_dialog("web", "default", "prod").await.unwrap();
        let result = orch.confirm_start().await;
        assert!(matches!(result, Err(Error::StartTimeout(_))));
        assert_eq!(orch.dialog().state(), SessionState::Error);
    }

    #[tokio::test]
    async fn test_stop_removes_session_and_tears_down_backend() {
        let mut orch = orchestrator(
            web_service(),
            vec![pod("p1", true)],
            FakeControl::succeeding(),
        );

        orch.open_dialog("web", "default", "prod").await.unwrap();
        orch.confirm_start().await.unwrap();
        assert_eq!(orch.sessions().len(), 1);

        orch.stop().await.unwrap();
        assert_eq!(orch.dialog().state(), SessionState::Closed);
        assert!(orch.registry().is_empty());
        assert_eq!(orch.control.stopped.lock().as_slice(), ["abc"]);

        // Stopping again fails: nothing is active.
        assert!(matches!(orch.stop().await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_open_in_browser_requires_active_session() {
        let mut orch = orchestrator(
            web_service(),
            vec![pod("p1", true)],
            FakeControl::succeeding(),
        );

        orch.open_dialog("web", "default", "prod").await.unwrap();
        assert!(matches!(
            orch.open_in_browser().await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(orch.session_url(), Err(Error::Validation(_))));

        orch.confirm_start().await.unwrap();
        assert_eq!(orch.session_url().unwrap(), "http://localhost:54321");
        orch.open_in_browser().await.unwrap();
        assert_eq!(orch.control.opened.lock().as_slice(), [54321]);
    }

    #[tokio::test]
    async fn test_service_lookups_are_cached_within_ttl() {
        let mut orch = orchestrator(
            web_service(),
            vec![pod("p1", true)],
            FakeControl::succeeding(),
        );

        orch.open_dialog("web", "default", "prod").await.unwrap();
        orch.reset().await;
        orch.open_dialog("web", "default", "prod").await.unwrap();
        assert_eq!(orch.resources.service_calls.load(Ordering::SeqCst), 1);

        orch.invalidate_service_cache();
        orch.reset().await;
        orch.open_dialog("web", "default", "prod").await.unwrap();
        assert_eq!(orch.resources.service_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_service_cache() {
        let settings = Settings {
            service_cache_ttl_secs: 0,
            ..Settings::default()
        };
        let mut orch = Orchestrator::new(
            FakeResources::new(web_service(), vec![pod("p1", true)]),
            FakeControl::succeeding(),
            settings,
        )
        .unwrap();

        orch.open_dialog("web", "default", "prod").await.unwrap();
        orch.reset().await;
        orch.open_dialog("web", "default", "prod").await.unwrap();
        assert_eq!(orch.resources.service_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_suggest_local_port_uses_settings() {
        let settings = Settings {
            local_port_min: 5000,
            local_port_max: 5002,
            reserved_ports: vec![5000, 5002],
            ..Settings::default()
        };
        let orch = Orchestrator::new(
            FakeResources::new(web_service(), vec![]),
            FakeControl::succeeding(),
            settings,
        )
        .unwrap();

        for _ in 0..50 {
            assert_eq!(orch.suggest_local_port(), 5001);
        }
    }

    #[tokio::test]
    async fn test_reset_while_active_closes_session() {
        let mut orch = orchestrator(
            web_service(),
            vec![pod("p1", true)],
            FakeControl::succeeding(),
        );

        orch.open_dialog("web", "default", "prod").await.unwrap();
        orch.confirm_start().await.unwrap();
        assert!(orch.registry().active_local_port_in_use(54321));

        orch.reset().await;

        // The session is gone from the registry, its local port is free
        // again, and the backend was asked to tear the tunnel down.
        assert_eq!(orch.dialog().state(), SessionState::Idle);
        assert!(orch.registry().is_empty());
        assert!(!orch.registry().active_local_port_in_use(54321));
        assert_eq!(orch.control.stopped.lock().as_slice(), ["abc"]);
    }

    #[test]
    fn test_constructor_rejects_invalid_settings() {
        let settings = Settings {
            local_port_min: 9000,
            local_port_max: 8000,
            ..Settings::default()
        };
        let result = Orchestrator::new(
            FakeResources::new(web_service(), vec![]),
            FakeControl::succeeding(),
            settings,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
