pub use self::parser::{
    Config, CronsConfig, DatabaseConfig, DbType, LimitsConfig, LoggingConfig, MetricsConfig,
    RelayConfig, ServerConfig, TenantEntry, TenantsConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
