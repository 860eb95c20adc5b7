use std::collections::HashMap;

use secrecy::SecretString;
use url::Url;

use crate::config::{ConfigError, DatabaseConfig, TenantEntry, TenantsConfig};

/// Connection descriptor for one tenant database. Loaded from configuration
/// at startup; connection details are never compiled into the binary.
#[derive(Debug, Clone)]
pub struct TenantDescriptor {
    pub id: String,
    pub name: Option<String>,
    pub database_url: String,
    pub service_key: Option<SecretString>,
    pub max_connections: Option<u32>,
}

impl TenantDescriptor {
    fn from_entry(entry: &TenantEntry) -> Result<Self, ConfigError> {
        let id = entry.id.trim();
        if id.is_empty() {
            return Err(ConfigError::Tenant("tenant id cannot be empty".to_string()));
        }

        let database_url = entry.database_url.trim();
        if database_url.is_empty() {
            return Err(ConfigError::Tenant(format!(
                "tenant {id} has an empty database_url"
            )));
        }
        Url::parse(database_url).map_err(|e| {
            ConfigError::Tenant(format!("tenant {id} has an invalid database_url: {e}"))
        })?;

        Ok(Self {
            id: id.to_string(),
            name: entry.name.clone(),
            database_url: database_url.to_string(),
            service_key: entry.service_key.clone(),
            max_connections: entry.max_connections,
        })
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: Some(self.database_url.clone()),
            conn_string: None,
            filename: None,
            max_connections: self.max_connections,
            min_connections: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TenantRegistry {
    tenants: HashMap<String, TenantDescriptor>,
}

impl TenantRegistry {
    pub fn from_config(config: &TenantsConfig) -> Result<Self, ConfigError> {
        let mut tenants = HashMap::new();
        for entry in &config.entries {
            let descriptor = TenantDescriptor::from_entry(entry)?;
            if tenants.insert(descriptor.id.clone(), descriptor).is_some() {
                return Err(ConfigError::Tenant(format!(
                    "duplicate tenant id: {}",
                    entry.id.trim()
                )));
            }
        }
        Ok(Self { tenants })
    }

    pub fn get(&self, tenant_id: &str) -> Option<&TenantDescriptor> {
        self.tenants.get(tenant_id)
    }

    pub fn contains(&self, tenant_id: &str) -> bool {
        self.tenants.contains_key(tenant_id)
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tenants.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, url: &str) -> TenantEntry {
        TenantEntry {
            id: id.to_string(),
            name: None,
            database_url: url.to_string(),
            service_key: None,
            max_connections: None,
        }
    }

    #[test]
    fn registry_builds_from_entries() {
        let config = TenantsConfig {
            file: None,
            entries: vec![
                entry("acme", "postgres://acme.example.com/feed"),
                entry("globex", "sqlite://globex.db"),
            ],
        };
        let registry = TenantRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("acme"));
        assert_eq!(registry.ids(), vec!["acme", "globex"]);
        let config = registry.get("globex").unwrap().database_config();
        assert_eq!(config.connection_string(), "sqlite://globex.db");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let config = TenantsConfig {
            file: None,
            entries: vec![
                entry("acme", "postgres://one.example.com/feed"),
                entry("acme", "postgres://two.example.com/feed"),
            ],
        };
        assert!(TenantRegistry::from_config(&config).is_err());
    }

    #[test]
    fn invalid_url_is_rejected() {
        let config = TenantsConfig {
            file: None,
            entries: vec![entry("acme", "not a url")],
        };
        assert!(TenantRegistry::from_config(&config).is_err());
    }

    #[test]
    fn unknown_tenant_resolves_to_none() {
        let registry = TenantRegistry::default();
        assert!(registry.get("ghost").is_none());
        assert!(registry.is_empty());
    }
}
