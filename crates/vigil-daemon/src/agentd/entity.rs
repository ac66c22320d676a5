//! Proxy entity resolution.

use vigil_core::entity::CLASS_PROXY;
use vigil_core::{entity_subscription, Entity, ObjectMeta};

use crate::store::{SessionStore, StoreResult};

/// Resolves the proxy entity a check result is attributed to: the
/// stored entity of that name, or a freshly materialized proxy entity.
///
/// Materialization is an idempotent upsert: two agents reporting for
/// the same proxy entity at once both succeed.
pub(crate) async fn get_proxy_entity(
    store: &dyn SessionStore,
    namespace: &str,
    name: &str,
) -> StoreResult<Entity> {
    if let Some(entity) = store.get_entity(namespace, name).await? {
        return Ok(entity);
    }

    let entity = Entity {
        metadata: ObjectMeta::new(name, namespace),
        entity_class: CLASS_PROXY.to_string(),
        subscriptions: vec![entity_subscription(name)],
        ..Entity::default()
    };
    store.create_or_update_entity(&entity).await?;
    Ok(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntityStore, MemoryStore};

    #[tokio::test]
    async fn materializes_missing_proxy_entities() {
        let store = MemoryStore::new();
        let entity = get_proxy_entity(&store, "default", "router-1").await.unwrap();

        assert_eq!(entity.entity_class, CLASS_PROXY);
        assert_eq!(entity.subscriptions, vec!["entity:router-1".to_string()]);
        assert!(store
            .get_entity("default", "router-1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn returns_existing_entities_untouched() {
        let store = MemoryStore::new();
        let stored = Entity {
            metadata: ObjectMeta::new("router-1", "default"),
            entity_class: "agent".into(),
            subscriptions: vec!["entity:router-1".into(), "network".into()],
            ..Entity::default()
        };
        store.create_or_update_entity(&stored).await.unwrap();

        let entity = get_proxy_entity(&store, "default", "router-1").await.unwrap();
        assert_eq!(entity, stored);
    }
}
