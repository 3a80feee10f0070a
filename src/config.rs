use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Read an optional environment knob, falling back to the default when the
/// variable is absent or unparseable.
fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
    pub test_before_acquire: bool,
}

/// Settings for the proposal change-feed watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval_secs: u64,
    pub batch_size: i64,
}

/// Settings for the settlement reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub batch_size: i64,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub watcher: WatcherConfig,
    pub reconciler: ReconcilerConfig,
    pub log_level: String,
    pub environment: String,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, String> {
        let url = env::var("DATABASE_URL")
            .map_err(|_| "DATABASE_URL environment variable is required")?;

        let config = Self {
            url,
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
            acquire_timeout_secs: env_parse("DATABASE_ACQUIRE_TIMEOUT_SECS", 30),
            idle_timeout_secs: env_parse("DATABASE_IDLE_TIMEOUT_SECS", 600),
            max_lifetime_secs: env_parse("DATABASE_MAX_LIFETIME_SECS", 1800),
            test_before_acquire: env_parse("DATABASE_TEST_BEFORE_ACQUIRE", true),
        };

        if config.max_connections == 0 {
            return Err("DATABASE_MAX_CONNECTIONS must be greater than 0".to_string());
        }
        if config.acquire_timeout_secs == 0 {
            return Err("DATABASE_ACQUIRE_TIMEOUT_SECS must be greater than 0".to_string());
        }

        Ok(config)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/skillswap".to_string(),
            max_connections: 10,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            test_before_acquire: true,
        }
    }
}

impl WatcherConfig {
    fn from_env() -> Result<Self, String> {
        let config = Self {
            poll_interval_secs: env_parse("WATCHER_POLL_INTERVAL_SECS", 2),
            batch_size: env_parse("WATCHER_BATCH_SIZE", 32),
        };

        if config.poll_interval_secs == 0 {
            return Err("WATCHER_POLL_INTERVAL_SECS must be greater than 0".to_string());
        }
        if config.batch_size <= 0 {
            return Err("WATCHER_BATCH_SIZE must be greater than 0".to_string());
        }

        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            batch_size: 32,
        }
    }
}

impl ReconcilerConfig {
    fn from_env() -> Result<Self, String> {
        let config = Self {
            enabled: env_parse("RECONCILER_ENABLED", true),
            interval_secs: env_parse("RECONCILER_INTERVAL_SECS", 300),
            batch_size: env_parse("RECONCILER_BATCH_SIZE", 16),
        };

        if config.interval_secs == 0 {
            return Err("RECONCILER_INTERVAL_SECS must be greater than 0".to_string());
        }
        if config.batch_size <= 0 {
            return Err("RECONCILER_BATCH_SIZE must be greater than 0".to_string());
        }

        Ok(config)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            batch_size: 16,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let database = DatabaseConfig::from_env()?;
        let watcher = WatcherConfig::from_env()?;
        let reconciler = ReconcilerConfig::from_env()?;

        let log_level = env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "info".to_string())
            .to_lowercase();
        if !["trace", "debug", "info", "warn", "error"].contains(&log_level.as_str()) {
            return Err(format!(
                "Invalid LOG_LEVEL '{}': expected trace, debug, info, warn or error",
                log_level
            ));
        }

        let environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase();
        if !["development", "staging", "production"].contains(&environment.as_str()) {
            return Err(format!(
                "Invalid ENVIRONMENT '{}': expected development, staging or production",
                environment
            ));
        }

        Ok(Self {
            database,
            watcher,
            reconciler,
            log_level,
            environment,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            watcher: WatcherConfig::default(),
            reconciler: ReconcilerConfig::default(),
            log_level: "info".to_string(),
            environment: "development".to_string(),
        }
    }
}
