use std::time::Duration;

use crate::domain::DEFAULT_MAX_PAGE_SIZE;

/// Ledger store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the SQLite database file.
    pub database_path: String,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// How long SQLite waits for the write lock before reporting busy.
    pub busy_timeout: Duration,
    /// How long a caller waits for a free pooled connection.
    pub acquire_timeout: Duration,
    /// Upper bound on one whole operation, unit of work included.
    pub operation_timeout: Duration,
    /// History pages larger than this are clamped.
    pub max_page_size: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: "wallet.db".to_string(),
            max_connections: 8,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(15),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

impl StoreConfig {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }

    pub fn with_max_page_size(mut self, max_page_size: i64) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    /// sqlx connection URL for the configured file.
    pub fn database_url(&self) -> String {
        format!("sqlite:{}", self.database_path)
    }
}
