use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::registry::{TenantDescriptor, TenantRegistry};
use crate::db::{Channel, DatabaseError, DatabaseManager};

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("channel {0} does not support access requests")]
    AccessRequestsUnsupported(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Outcome of credential routing: the channel row plus the database manager
/// all reads/writes for that channel must go through.
#[derive(Clone)]
pub struct ResolvedChannel {
    pub channel: Channel,
    pub store: Arc<DatabaseManager>,
    pub uses_own_db: bool,
    pub tenant_id: Option<String>,
}

pub struct TenantRouter {
    global: Arc<DatabaseManager>,
    registry: TenantRegistry,
    // Opened tenant pools, keyed by tenant id. Credentials themselves are
    // resolved fresh from the registry on every request.
    tenant_managers: Mutex<HashMap<String, Arc<DatabaseManager>>>,
}

impl TenantRouter {
    pub fn new(global: Arc<DatabaseManager>, registry: TenantRegistry) -> Self {
        Self {
            global,
            registry,
            tenant_managers: Mutex::new(HashMap::new()),
        }
    }

    pub fn global(&self) -> Arc<DatabaseManager> {
        self.global.clone()
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    pub async fn resolve(&self, username: &str) -> Result<ResolvedChannel, RouteError> {
        let channel = self
            .global
            .channel_store()
            .get_channel(username)
            .await?
            .ok_or_else(|| RouteError::ChannelNotFound(username.to_string()))?;

        self.resolve_channel(channel).await
    }

    pub async fn resolve_channel(&self, channel: Channel) -> Result<ResolvedChannel, RouteError> {
        if channel.is_owner_db {
            match channel
                .tenant_id
                .as_deref()
                .and_then(|id| self.registry.get(id))
            {
                Some(descriptor) => {
                    let store = self.tenant_manager(descriptor).await?;
                    return Ok(ResolvedChannel {
                        tenant_id: Some(descriptor.id.clone()),
                        store,
                        uses_own_db: true,
                        channel,
                    });
                }
                None => {
                    // Flagged as owner-db but not routable; serve from the
                    // global store rather than failing reads.
                    warn!(
                        "channel {} is marked is_owner_db but has no registered tenant",
                        channel.username
                    );
                }
            }
        }

        Ok(ResolvedChannel {
            channel,
            store: self.global.clone(),
            uses_own_db: false,
            tenant_id: None,
        })
    }

    /// Like [`resolve`], but a channel that does not route to its own tenant
    /// database cannot accept access requests.
    pub async fn resolve_for_access_request(
        &self,
        username: &str,
    ) -> Result<ResolvedChannel, RouteError> {
        let resolved = self.resolve(username).await?;
        if !resolved.uses_own_db {
            return Err(RouteError::AccessRequestsUnsupported(username.to_string()));
        }
        Ok(resolved)
    }

    pub async fn tenant_manager_by_id(
        &self,
        tenant_id: &str,
    ) -> Result<Option<Arc<DatabaseManager>>, DatabaseError> {
        match self.registry.get(tenant_id) {
            Some(descriptor) => self.tenant_manager(descriptor).await.map(Some),
            None => Ok(None),
        }
    }

    async fn tenant_manager(
        &self,
        descriptor: &TenantDescriptor,
    ) -> Result<Arc<DatabaseManager>, DatabaseError> {
        let mut managers = self.tenant_managers.lock().await;
        if let Some(manager) = managers.get(&descriptor.id) {
            return Ok(manager.clone());
        }

        info!("opening tenant database for {}", descriptor.id);
        let manager = Arc::new(DatabaseManager::new(&descriptor.database_config()).await?);
        manager.migrate().await?;
        managers.insert(descriptor.id.clone(), manager.clone());
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::config::{DatabaseConfig, TenantEntry, TenantsConfig};
    use crate::feed::{FeedItemKind, NewFeedItem};

    async fn global_manager(dir: &TempDir) -> Arc<DatabaseManager> {
        let config = DatabaseConfig {
            filename: Some(dir.path().join("global.db").to_string_lossy().to_string()),
            ..DatabaseConfig::default()
        };
        let manager = Arc::new(DatabaseManager::new(&config).await.unwrap());
        manager.migrate().await.unwrap();
        manager
    }

    fn registry_with_tenant(dir: &TempDir, id: &str) -> TenantRegistry {
        let config = TenantsConfig {
            file: None,
            entries: vec![TenantEntry {
                id: id.to_string(),
                name: None,
                database_url: format!(
                    "sqlite://{}",
                    dir.path().join("tenant.db").to_string_lossy()
                ),
                service_key: None,
                max_connections: None,
            }],
        };
        TenantRegistry::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn unknown_channel_is_not_found() {
        let dir = TempDir::new().unwrap();
        let global = global_manager(&dir).await;
        let router = TenantRouter::new(global, TenantRegistry::default());

        assert!(matches!(
            router.resolve("ghost").await,
            Err(RouteError::ChannelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn shared_channel_resolves_to_global_store() {
        let dir = TempDir::new().unwrap();
        let global = global_manager(&dir).await;

        // stray tenant_id on a non-owner-db channel must be ignored
        let mut channel = Channel::new("janedoe".to_string(), "Jane".to_string());
        channel.tenant_id = Some("acme".to_string());
        global.channel_store().upsert_channel(&channel).await.unwrap();

        let router = TenantRouter::new(global, registry_with_tenant(&dir, "acme"));
        let resolved = router.resolve("janedoe").await.unwrap();
        assert!(!resolved.uses_own_db);
        assert!(resolved.tenant_id.is_none());
    }

    #[tokio::test]
    async fn owner_db_channel_routes_to_tenant_store() {
        let dir = TempDir::new().unwrap();
        let global = global_manager(&dir).await;

        let mut channel = Channel::new("acmenews".to_string(), "Acme News".to_string());
        channel.is_owner_db = true;
        channel.tenant_id = Some("acme".to_string());
        global.channel_store().upsert_channel(&channel).await.unwrap();

        let router = TenantRouter::new(global.clone(), registry_with_tenant(&dir, "acme"));
        let resolved = router.resolve("acmenews").await.unwrap();
        assert!(resolved.uses_own_db);
        assert_eq!(resolved.tenant_id.as_deref(), Some("acme"));

        // writes land in the tenant database, not the global one
        resolved
            .store
            .feed_store()
            .create_feed_item(&NewFeedItem::text("acmenews", FeedItemKind::Tweet, "hi"))
            .await
            .unwrap();
        assert_eq!(
            resolved.store.feed_store().count_feed_items("acmenews").await.unwrap(),
            1
        );
        assert_eq!(
            global.feed_store().count_feed_items("acmenews").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn owner_db_without_registered_tenant_falls_back_to_global() {
        let dir = TempDir::new().unwrap();
        let global = global_manager(&dir).await;

        let mut channel = Channel::new("orphan".to_string(), "Orphan".to_string());
        channel.is_owner_db = true;
        channel.tenant_id = Some("missing".to_string());
        global.channel_store().upsert_channel(&channel).await.unwrap();

        let router = TenantRouter::new(global, TenantRegistry::default());
        let resolved = router.resolve("orphan").await.unwrap();
        assert!(!resolved.uses_own_db);
    }

    #[tokio::test]
    async fn access_requests_need_an_own_database() {
        let dir = TempDir::new().unwrap();
        let global = global_manager(&dir).await;

        let channel = Channel::new("janedoe".to_string(), "Jane".to_string());
        global.channel_store().upsert_channel(&channel).await.unwrap();

        let router = TenantRouter::new(global, TenantRegistry::default());
        assert!(matches!(
            router.resolve_for_access_request("janedoe").await,
            Err(RouteError::AccessRequestsUnsupported(_))
        ));
    }
}
