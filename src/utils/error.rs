use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Cron error: {0}")]
    Cron(String),

    #[error("Web error: {0}")]
    Web(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
