use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::tenancy::TenantRegistry;

#[derive(Parser, Debug)]
#[command(name = "superfeed-server")]
#[command(about = "Multi-tenant channel feed and relay server", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Validate the configuration file and tenant registry")]
    ValidateConfig,

    #[command(about = "List registered tenants (keys redacted)")]
    ListTenants,

    #[command(about = "Run one cron job and print its report")]
    RunCron {
        #[arg(value_enum)]
        job: CronJob,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CronJob {
    Global,
    Tenant,
    Showcase,
}

pub fn registry_summary(registry: &TenantRegistry) -> String {
    if registry.is_empty() {
        return "no tenants registered".to_string();
    }

    let mut lines = Vec::with_capacity(registry.len());
    for id in registry.ids() {
        let descriptor = registry.get(&id).expect("listed id resolves");
        let name = descriptor.name.as_deref().unwrap_or("-");
        let key = if descriptor.service_key.is_some() {
            "key: ***"
        } else {
            "key: none"
        };
        lines.push(format!("{id}\t{name}\t{}\t{key}", descriptor.database_url));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TenantEntry, TenantsConfig};

    #[test]
    fn registry_summary_redacts_keys() {
        let config = TenantsConfig {
            file: None,
            entries: vec![TenantEntry {
                id: "acme".to_string(),
                name: Some("Acme".to_string()),
                database_url: "postgres://acme.example.com/feed".to_string(),
                service_key: Some(secrecy::SecretString::from("super-secret")),
                max_connections: None,
            }],
        };
        let registry = TenantRegistry::from_config(&config).unwrap();

        let summary = registry_summary(&registry);
        assert!(summary.contains("acme"));
        assert!(summary.contains("***"));
        assert!(!summary.contains("super-secret"));
    }

    #[test]
    fn empty_registry_summary() {
        assert_eq!(
            registry_summary(&TenantRegistry::default()),
            "no tenants registered"
        );
    }
}
