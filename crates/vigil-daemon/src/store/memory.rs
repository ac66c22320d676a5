//! In-memory resource store.
//!
//! Reference implementation of the store traits, used by the daemon
//! when no external store engine is wired in and by tests as the
//! fixture store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use vigil_core::{ClusterRole, ClusterRoleBinding, Entity, Namespace, Role, RoleBinding};

use super::{EntityStore, NamespaceStore, RbacStore, StoreError, StoreResult};

#[derive(Default)]
struct Resources {
    namespaces: HashMap<String, Namespace>,
    /// Entities keyed by `(namespace, name)`.
    entities: HashMap<(String, String), Entity>,
    cluster_role_bindings: HashMap<String, ClusterRoleBinding>,
    /// Role bindings keyed by `(namespace, name)`.
    role_bindings: HashMap<(String, String), RoleBinding>,
    cluster_roles: HashMap<String, ClusterRole>,
    /// Roles keyed by `(namespace, name)`.
    roles: HashMap<(String, String), Role>,
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct MemoryStore {
    resources: RwLock<Resources>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Resources>> {
        self.resources
            .read()
            .map_err(|_| StoreError::Internal("store state poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Resources>> {
        self.resources
            .write()
            .map_err(|_| StoreError::Internal("store state poisoned".to_string()))
    }

    /// Stores a cluster role binding, replacing any previous one of the
    /// same name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Internal`] when the store state is
    /// unusable.
    pub fn put_cluster_role_binding(&self, binding: ClusterRoleBinding) -> StoreResult<()> {
        self.write()?
            .cluster_role_bindings
            .insert(binding.metadata.name.clone(), binding);
        Ok(())
    }

    /// Stores a role binding, replacing any previous one of the same
    /// namespace and name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Internal`] when the store state is
    /// unusable.
    pub fn put_role_binding(&self, binding: RoleBinding) -> StoreResult<()> {
        let key = (
            binding.metadata.namespace.clone(),
            binding.metadata.name.clone(),
        );
        self.write()?.role_bindings.insert(key, binding);
        Ok(())
    }

    /// Stores a cluster role, replacing any previous one of the same
    /// name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Internal`] when the store state is
    /// unusable.
    pub fn put_cluster_role(&self, role: ClusterRole) -> StoreResult<()> {
        self.write()?
            .cluster_roles
            .insert(role.metadata.name.clone(), role);
        Ok(())
    }

    /// Stores a role, replacing any previous one of the same namespace
    /// and name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Internal`] when the store state is
    /// unusable.
    pub fn put_role(&self, role: Role) -> StoreResult<()> {
        let key = (role.metadata.namespace.clone(), role.metadata.name.clone());
        self.write()?.roles.insert(key, role);
        Ok(())
    }

    /// Removes a cluster role binding by name. Removing a missing
    /// binding is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Internal`] when the store state is
    /// unusable.
    pub fn delete_cluster_role_binding(&self, name: &str) -> StoreResult<()> {
        self.write()?.cluster_role_bindings.remove(name);
        Ok(())
    }
}

#[async_trait]
impl NamespaceStore for MemoryStore {
    async fn get_namespace(&self, name: &str) -> StoreResult<Option<Namespace>> {
        Ok(self.read()?.namespaces.get(name).cloned())
    }

    async fn create_namespace(&self, namespace: &Namespace) -> StoreResult<()> {
        self.write()?
            .namespaces
            .insert(namespace.name.clone(), namespace.clone());
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_entity(&self, namespace: &str, name: &str) -> StoreResult<Option<Entity>> {
        Ok(self
            .read()?
            .entities
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn create_or_update_entity(&self, entity: &Entity) -> StoreResult<()> {
        let key = (
            entity.metadata.namespace.clone(),
            entity.metadata.name.clone(),
        );
        self.write()?.entities.insert(key, entity.clone());
        Ok(())
    }
}

#[async_trait]
impl RbacStore for MemoryStore {
    async fn list_cluster_role_bindings(&self) -> StoreResult<Vec<ClusterRoleBinding>> {
        let mut bindings: Vec<ClusterRoleBinding> =
            self.read()?.cluster_role_bindings.values().cloned().collect();
        bindings.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(bindings)
    }

    async fn list_role_bindings(&self, namespace: &str) -> StoreResult<Vec<RoleBinding>> {
        let mut bindings: Vec<RoleBinding> = self
            .read()?
            .role_bindings
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, b)| b.clone())
            .collect();
        bindings.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        Ok(bindings)
    }

    async fn get_cluster_role(&self, name: &str) -> StoreResult<Option<ClusterRole>> {
        Ok(self.read()?.cluster_roles.get(name).cloned())
    }

    async fn get_role(&self, namespace: &str, name: &str) -> StoreResult<Option<Role>> {
        Ok(self
            .read()?
            .roles
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}
