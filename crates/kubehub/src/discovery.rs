//! Kind to API resource mapping through API discovery.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kube::core::{ApiResource, GroupVersionKind};
use kube::discovery::{Discovery, Scope};
use kube::Client;
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use flotilla_core::FlotillaConfig;
use flotilla_objectwatcher::{ResourceMapping, TypeResolver};

/// Run a full discovery and return every recommended resource with its scope.
pub async fn discover_all(client: Client) -> Result<Vec<(ApiResource, bool)>> {
    let discovery = Discovery::new(client).run().await?;
    let mut out = Vec::new();
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            out.push((ar, matches!(caps.scope, Scope::Namespaced)));
        }
    }
    Ok(out)
}

/// Token bucket bounding how often discovery may be re-run: `burst` back-to-back runs, then
/// `qps` per second.
#[derive(Debug)]
pub struct RefreshLimiter {
    capacity: f64,
    per_sec: f64,
    state: Mutex<(f64, Instant)>,
}

impl RefreshLimiter {
    pub fn new(burst: u32, qps: f32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self { capacity, per_sec: f64::from(qps).max(f64::MIN_POSITIVE), state: Mutex::new((capacity, Instant::now())) }
    }

    /// Take a token at `now`, or report how long until one is available.
    pub fn try_acquire_at(&self, now: Instant) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (tokens, last) = *state;
        let refilled = (tokens + now.saturating_duration_since(last).as_secs_f64() * self.per_sec).min(self.capacity);
        if refilled >= 1.0 {
            *state = (refilled - 1.0, now);
            Ok(())
        } else {
            *state = (refilled, now);
            Err(Duration::from_secs_f64((1.0 - refilled) / self.per_sec))
        }
    }

    pub async fn acquire(&self) {
        while let Err(wait) = self.try_acquire_at(Instant::now()) {
            tokio::time::sleep(wait).await;
        }
    }
}

fn gvk_key(gvk: &GroupVersionKind) -> (String, String, String) {
    (gvk.group.clone(), gvk.version.clone(), gvk.kind.clone())
}

/// [`TypeResolver`] backed by API discovery of one cluster, cached for the process lifetime.
/// A miss re-runs discovery (rate limited) so newly installed CRDs are picked up.
pub struct DiscoveryResolver {
    client: Client,
    limiter: RefreshLimiter,
    cache: RwLock<FxHashMap<(String, String, String), ResourceMapping>>,
}

impl DiscoveryResolver {
    pub fn new(client: Client, config: &FlotillaConfig) -> Self {
        Self {
            client,
            limiter: RefreshLimiter::new(config.discovery_burst, config.discovery_qps),
            cache: RwLock::new(FxHashMap::default()),
        }
    }

    async fn refresh(&self) -> Result<()> {
        self.limiter.acquire().await;
        let started = Instant::now();
        let found = discover_all(self.client.clone()).await?;
        counter!("kubehub_discovery_runs_total", 1u64);
        let mut cache = self.cache.write().await;
        cache.clear();
        for (api_resource, namespaced) in found {
            let key = (api_resource.group.clone(), api_resource.version.clone(), api_resource.kind.clone());
            cache.insert(key, ResourceMapping { api_resource, namespaced });
        }
        info!(kinds = cache.len(), took_ms = %started.elapsed().as_millis(), "kubehub: discovery refreshed");
        Ok(())
    }
}

#[async_trait]
impl TypeResolver for DiscoveryResolver {
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<ResourceMapping> {
        let key = gvk_key(gvk);
        if let Some(m) = self.cache.read().await.get(&key) {
            return Ok(m.clone());
        }
        debug!(group = %gvk.group, version = %gvk.version, kind = %gvk.kind, "kubehub: discovery miss");
        self.refresh().await?;
        self.cache
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_throttle() {
        let l = RefreshLimiter::new(2, 1.0);
        let t0 = Instant::now();
        assert!(l.try_acquire_at(t0).is_ok());
        assert!(l.try_acquire_at(t0).is_ok());
        let wait = l.try_acquire_at(t0).unwrap_err();
        assert!(wait > Duration::from_millis(900) && wait <= Duration::from_secs(1));
        assert!(l.try_acquire_at(t0 + Duration::from_millis(1100)).is_ok());
    }

    #[test]
    fn refill_is_capped_at_burst() {
        let l = RefreshLimiter::new(1, 50.0);
        let t0 = Instant::now();
        assert!(l.try_acquire_at(t0 + Duration::from_secs(60)).is_ok());
        assert!(l.try_acquire_at(t0 + Duration::from_secs(60)).is_err());
    }
}
