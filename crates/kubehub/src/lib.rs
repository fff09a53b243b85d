//! Flotilla kubehub: the kube-backed collaborators of the object watcher.
//!
//! * [`KubeconfigClientFactory`] builds one client per member cluster from kubeconfig contexts.
//! * [`DiscoveryResolver`] maps kinds to API resources through API discovery.
//! * [`MemoryCache`] is an in-memory object cache kept current by list+watch streams.
//! * [`KubeDynamicClient`] performs writes through `Api<DynamicObject>`.

#![forbid(unsafe_code)]

pub mod cache;
pub mod client;
pub mod discovery;
pub mod dynamic;

pub use cache::MemoryCache;
pub use client::{control_plane_client, KubeconfigClientFactory};
pub use discovery::{discover_all, DiscoveryResolver, RefreshLimiter};
pub use dynamic::KubeDynamicClient;
