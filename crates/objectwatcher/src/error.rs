use std::fmt;

use flotilla_core::{FederatedKey, MetaError, ObjectKey, CONFLICT_RESOLUTION_ANNOTATION};
use flotilla_interpreter::InterpretError;

use crate::client::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Update,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// A member cluster rejected or failed the call. Never retried here.
    #[error("{verb} {key} in cluster {cluster}: {source}")]
    Remote {
        cluster: String,
        key: ObjectKey,
        verb: Verb,
        #[source]
        source: kube::Error,
    },
    #[error(
        "{key} already exists in cluster {cluster} and is not managed by flotilla; \
         set annotation {}=overwrite to take it over",
        CONFLICT_RESOLUTION_ANNOTATION
    )]
    Conflict { cluster: String, key: ObjectKey },
    #[error("no version recorded for {key} in cluster {cluster}")]
    MissingVersion { cluster: String, key: ObjectKey },
    #[error("read {key} from cache: {source}")]
    Cache {
        key: FederatedKey,
        #[source]
        source: CacheError,
    },
    #[error("map {gvk} to a resource: {source}")]
    TypeResolution {
        gvk: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("build client for cluster {cluster}: {source}")]
    ClientFactory {
        cluster: String,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Meta(#[from] MetaError),
    #[error("retain fields of {key} in cluster {cluster}: {source}")]
    Retain {
        cluster: String,
        key: ObjectKey,
        #[source]
        source: InterpretError,
    },
    #[error(transparent)]
    Interpret(#[from] InterpretError),
}

impl WatchError {
    /// Ownership conflicts need an operator decision; retrying will not clear them.
    pub fn is_conflict(&self) -> bool {
        matches!(self, WatchError::Conflict { .. })
    }
}
