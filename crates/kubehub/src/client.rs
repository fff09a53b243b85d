//! Member cluster clients built from kubeconfig contexts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use flotilla_core::FlotillaConfig;
use flotilla_objectwatcher::{ClusterClientFactory, MemberClusterClient};

use crate::dynamic::KubeDynamicClient;

async fn build_client(kubeconfig: Option<&PathBuf>, context: Option<&str>, timeout: Duration) -> Result<Client> {
    let kc = match kubeconfig {
        Some(path) => Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig {}", path.display()))?,
        None => Kubeconfig::read().context("reading default kubeconfig")?,
    };
    let opts = KubeConfigOptions { context: context.map(str::to_string), ..Default::default() };
    let mut config = Config::from_custom_kubeconfig(kc, &opts)
        .await
        .with_context(|| format!("loading context {:?}", context.unwrap_or("<current>")))?;
    config.read_timeout = Some(timeout);
    Client::try_from(config).context("building kube client")
}

/// Client for the control plane, from the configured kubeconfig and context.
pub async fn control_plane_client(cfg: &FlotillaConfig) -> Result<Client> {
    build_client(cfg.kubeconfig.as_ref(), cfg.context.as_deref(), cfg.command_timeout).await
}

/// Resolves member cluster names to kubeconfig contexts; by default the context shares the
/// cluster's name. Clients are built once per cluster and reused.
pub struct KubeconfigClientFactory {
    kubeconfig: Option<PathBuf>,
    contexts: BTreeMap<String, String>,
    timeout: Duration,
    clients: Mutex<FxHashMap<String, Client>>,
}

impl KubeconfigClientFactory {
    pub fn from_config(cfg: &FlotillaConfig) -> Self {
        Self {
            kubeconfig: cfg.kubeconfig.clone(),
            contexts: BTreeMap::new(),
            timeout: cfg.command_timeout,
            clients: Mutex::new(FxHashMap::default()),
        }
    }

    /// Route `cluster` to a differently named kubeconfig context.
    pub fn with_context(mut self, cluster: impl Into<String>, context: impl Into<String>) -> Self {
        self.contexts.insert(cluster.into(), context.into());
        self
    }

    /// Raw client for `cluster`, built on first use.
    pub async fn kube_client(&self, cluster: &str) -> Result<Client> {
        let mut clients = self.clients.lock().await;
        if let Some(c) = clients.get(cluster) {
            debug!(cluster, "kubehub: reusing member client");
            return Ok(c.clone());
        }
        let context = self.context_for(cluster);
        let c = build_client(self.kubeconfig.as_ref(), Some(context), self.timeout)
            .await
            .with_context(|| format!("member cluster {cluster}"))?;
        info!(cluster, context, "kubehub: member client ready");
        clients.insert(cluster.to_string(), c.clone());
        Ok(c)
    }

    pub fn context_for<'a>(&'a self, cluster: &'a str) -> &'a str {
        self.contexts.get(cluster).map(String::as_str).unwrap_or(cluster)
    }
}

#[async_trait]
impl ClusterClientFactory for KubeconfigClientFactory {
    async fn client_for(&self, cluster: &str) -> Result<MemberClusterClient> {
        let client = self.kube_client(cluster).await?;
        Ok(MemberClusterClient { cluster_name: cluster.to_string(), client: Arc::new(KubeDynamicClient::new(client)) })
    }
}
