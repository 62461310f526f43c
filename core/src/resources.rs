//! Cluster resource models and API response parsing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Selector
// ============================================================================

/// A service's label selector.
///
/// Keys are unique. Iteration order is irrelevant for matching, but the
/// query-string join is deterministic (sorted by key).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selector(BTreeMap<String, String>);

impl Selector {
    /// Creates an empty selector.
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds or replaces a label requirement.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Joined `key=value` pairs, comma-separated, for a label-selector
    /// query parameter.
    pub fn to_query(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Superset match: every selector key must be present in `labels`
    /// with an equal value.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }
}

impl FromIterator<(String, String)> for Selector {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Selector {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

// ============================================================================
// Pods
// ============================================================================

/// Readiness of a single container, as reported by the pod status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ready: bool,
}

/// A pod as returned by the resource query API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

impl PodSummary {
    /// A pod is ready when it has at least one container status and all
    /// of them report ready.
    pub fn is_ready(&self) -> bool {
        !self.container_statuses.is_empty() && self.container_statuses.iter().all(|c| c.ready)
    }

    /// Derives the candidate view used during selection.
    pub fn to_candidate(&self) -> CandidatePod {
        CandidatePod {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            ready: self.is_ready(),
        }
    }
}

/// A pod that currently backs a service, with readiness computed.
///
/// Derived on every resolve, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePod {
    pub name: String,
    pub namespace: String,
    pub ready: bool,
}

// ============================================================================
// Services
// ============================================================================

/// Kubernetes targetPort can be either an integer or a string (named port).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetPort {
    Int(u16),
    Name(String),
}

impl TargetPort {
    /// Returns the integer value if available.
    pub fn as_int(&self) -> Option<u16> {
        match self {
            TargetPort::Int(v) => Some(*v),
            TargetPort::Name(_) => None,
        }
    }
}

impl fmt::Display for TargetPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPort::Int(v) => write!(f, "{}", v),
            TargetPort::Name(n) => write!(f, "{}", n),
        }
    }
}

impl From<u16> for TargetPort {
    fn from(port: u16) -> Self {
        TargetPort::Int(port)
    }
}

/// A port exposed by a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: TargetPort,
    pub protocol: Option<String>,
}

impl ServicePort {
    /// Returns a display name for the port (e.g., "8080 (http)").
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => format!("{} ({})", self.port, name),
            _ => self.port.to_string(),
        }
    }
}

/// A service as returned by the resource query API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSummary {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub selector: Selector,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

impl ServiceSummary {
    /// Returns the service ID in the format "namespace/name".
    pub fn id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

// ============================================================================
// API JSON Response Parsing
// ============================================================================

/// Response structure for a pod list query (`kind: PodList` shape).
#[derive(Debug, Deserialize)]
pub struct PodListResponse {
    pub items: Vec<PodItem>,
}

#[derive(Debug, Deserialize)]
pub struct PodItem {
    pub metadata: PodMetadata,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Deserialize)]
pub struct PodMetadata {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

impl PodListResponse {
    /// Converts the API response to a list of PodSummary, preserving
    /// the order the API returned them in.
    pub fn into_pods(self) -> Vec<PodSummary> {
        self.items
            .into_iter()
            .map(|item| PodSummary {
                name: item.metadata.name,
                namespace: item.metadata.namespace,
                labels: item.metadata.labels,
                container_statuses: item.status.container_statuses,
            })
            .collect()
    }
}

/// Response structure for a service list query (`kind: ServiceList` shape).
#[derive(Debug, Deserialize)]
pub struct ServiceListResponse {
    pub items: Vec<ServiceItem>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceItem {
    pub metadata: ServiceMetadata,
    pub spec: ServiceSpec,
}

#[derive(Debug, Deserialize)]
pub struct ServiceMetadata {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    pub ports: Option<Vec<ServicePortSpec>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePortSpec {
    pub name: Option<String>,
    pub port: u16,
    pub target_port: Option<TargetPort>,
    pub protocol: Option<String>,
}

impl ServiceItem {
    /// Converts a single service item to a ServiceSummary.
    ///
    /// A port without an explicit targetPort defaults to the service port.
    pub fn into_summary(self) -> ServiceSummary {
        ServiceSummary {
            name: self.metadata.name,
            namespace: self.metadata.namespace,
            selector: self.spec.selector.into_iter().collect(),
            ports: self
                .spec
                .ports
                .unwrap_or_default()
                .into_iter()
                .map(|p| ServicePort {
                    name: p.name,
                    target_port: p.target_port.unwrap_or(TargetPort::Int(p.port)),
                    port: p.port,
                    protocol: p.protocol,
                })
                .collect(),
        }
    }
}

impl ServiceListResponse {
    /// Converts the API response to a list of ServiceSummary.
    pub fn into_services(self) -> Vec<ServiceSummary> {
        self.items
            .into_iter()
            .map(ServiceItem::into_summary)
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
