//! Store traits consumed by the backend core.
//!
//! Persistent store engines are external collaborators; the core only
//! depends on the narrow trait surface defined here, plus the
//! lease-backed key/value interface ([`kv`]) that backs subscription
//! rings. [`MemoryStore`] and [`kv::MemoryKv`] are the in-process
//! implementations used by the daemon and by tests.

pub mod kv;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use vigil_core::{ClusterRole, ClusterRoleBinding, Entity, Namespace, Role, RoleBinding};

pub use memory::MemoryStore;

/// Errors surfaced by store implementations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store failed internally; the message carries engine detail.
    #[error("internal store error: {0}")]
    Internal(String),

    /// A lease referenced by a key/value operation does not exist or
    /// has expired.
    #[error("lease {0} not found or expired")]
    LeaseNotFound(u64),

    /// The store has shut down.
    #[error("store is closed")]
    Closed,
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Read/write access to namespaces.
#[async_trait]
pub trait NamespaceStore: Send + Sync {
    /// Fetches a namespace by name. `None` when absent.
    async fn get_namespace(&self, name: &str) -> StoreResult<Option<Namespace>>;

    /// Creates a namespace; overwriting an existing one is an error-free
    /// no-op.
    async fn create_namespace(&self, namespace: &Namespace) -> StoreResult<()>;
}

/// Read/write access to entities.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetches an entity by namespace and name. `None` when absent.
    async fn get_entity(&self, namespace: &str, name: &str) -> StoreResult<Option<Entity>>;

    /// Idempotent upsert: creates the entity or replaces the stored
    /// copy. Concurrent upserts of the same entity both succeed.
    async fn create_or_update_entity(&self, entity: &Entity) -> StoreResult<()>;
}

/// The store surface an agent session needs.
pub trait SessionStore: NamespaceStore + EntityStore {}

impl<T: NamespaceStore + EntityStore> SessionStore for T {}

/// Read access to RBAC resources, consumed by the authorizer.
#[async_trait]
pub trait RbacStore: Send + Sync {
    /// Lists every cluster role binding.
    async fn list_cluster_role_bindings(&self) -> StoreResult<Vec<ClusterRoleBinding>>;

    /// Lists the role bindings of a namespace.
    async fn list_role_bindings(&self, namespace: &str) -> StoreResult<Vec<RoleBinding>>;

    /// Fetches a cluster role by name. `None` when absent.
    async fn get_cluster_role(&self, name: &str) -> StoreResult<Option<ClusterRole>>;

    /// Fetches a role by namespace and name. `None` when absent.
    async fn get_role(&self, namespace: &str, name: &str) -> StoreResult<Option<Role>>;
}
