//! Resolves a service's label selector to the pods currently backing it.

use tracing::debug;

use crate::client::ResourceClient;
use crate::error::{Error, Result};
use crate::resources::{CandidatePod, PodSummary, Selector};

/// Resolves candidate pods for a selector in a namespace.
///
/// Issues a single list query filtered by the joined selector and
/// computes readiness per pod. Pods come back in the order the API
/// returned them; callers prefer the first ready pod (see
/// [`default_candidate`]). Nothing is retried here; the caller
/// re-invokes `resolve` on failure.
pub async fn resolve<R: ResourceClient>(
    client: &R,
    selector: &Selector,
    namespace: &str,
    cluster: &str,
) -> Result<Vec<CandidatePod>> {
    // A service without a selector cannot be auto-targeted. Fail before
    // touching the network.
    if selector.is_empty() {
        return Err(Error::NoSelector);
    }

    let query = selector.to_query();
    debug!(cluster, namespace, selector = %query, "listing pods for selector");

    let pods = client
        .list_pods(cluster, namespace, &query)
        .await
        .map_err(|e| Error::ResolutionFailed(e.to_string()))?;

    if pods.is_empty() {
        return Err(Error::NoMatchingPods(query));
    }

    Ok(pods.iter().map(PodSummary::to_candidate).collect())
}

/// Deterministic tie-break among resolved pods: the first ready pod in
/// API order, else the first pod.
pub fn default_candidate(pods: &[CandidatePod]) -> Option<&CandidatePod> {
    pods.iter().find(|p| p.ready).or_else(|| pods.first())
}
