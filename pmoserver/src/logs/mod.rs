//! # Module de logs
//!
//! Initialise le subscriber `tracing` global à partir de la configuration
//! (`host.logger`) et garde une poignée pour changer le niveau à chaud.
//!
//! ```rust,ignore
//! let handle = init_logging(LoggingOptions::from_config(&get_config()));
//! handle.set_level("DEBUG")?;
//!
//! // Réglage du niveau via HTTP
//! server.add_router("/", create_logs_router(handle.clone())).await;
//! ```

use anyhow::{Result, anyhow};
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use pmoconfig::Config;
use serde::{Deserialize, Serialize};
use tracing::{Level, warn};
use tracing_subscriber::{
    Registry, filter::LevelFilter, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Options du subscriber global
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub min_level: Level,
    pub enable_console: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            min_level: Level::INFO,
            enable_console: true,
        }
    }
}

impl LoggingOptions {
    /// Lit `host.logger.min_level` et `host.logger.enable_console`.
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let min_level = config
            .get_log_min_level()
            .ok()
            .and_then(|l| string_to_level(&l))
            .unwrap_or(defaults.min_level);
        let enable_console = config
            .get_log_enable_console()
            .unwrap_or(defaults.enable_console);

        Self {
            min_level,
            enable_console,
        }
    }
}

/// Poignée sur le filtre de niveau du subscriber global
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<LevelFilter, Registry>,
}

impl LogHandle {
    /// Change le niveau minimal ("ERROR", "WARN", "INFO", "DEBUG", "TRACE")
    pub fn set_level(&self, level: &str) -> Result<()> {
        let level = string_to_level(level).ok_or_else(|| anyhow!("Unknown log level '{}'", level))?;
        self.handle
            .modify(|filter| *filter = level_to_levelfilter(level))
            .map_err(|e| anyhow!("Cannot change log level: {}", e))
    }

    /// Niveau courant, `None` si le subscriber a disparu
    pub fn level(&self) -> Option<LevelFilter> {
        self.handle.clone_current()
    }
}

impl std::fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogHandle")
            .field("level", &self.level())
            .finish()
    }
}

/// Installe le subscriber global.
///
/// Si un subscriber est déjà installé (tests, application hôte), il est
/// conservé et la poignée retournée n'a plus d'effet.
pub fn init_logging(options: LoggingOptions) -> LogHandle {
    let (filter, handle) = reload::Layer::new(level_to_levelfilter(options.min_level));

    let console = options.enable_console.then(|| {
        fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
    });

    if let Err(e) = Registry::default().with(filter).with(console).try_init() {
        warn!("Logging already initialized: {}", e);
    }

    LogHandle { handle }
}

pub fn string_to_level(s: &str) -> Option<Level> {
    match s.trim().to_ascii_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

pub fn level_to_levelfilter(level: Level) -> LevelFilter {
    LevelFilter::from_level(level)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogSetup {
    pub level: String,
}

async fn get_log_setup(State(handle): State<LogHandle>) -> Json<LogSetup> {
    let level = handle
        .level()
        .map(|l| l.to_string().to_uppercase())
        .unwrap_or_else(|| "OFF".to_string());
    Json(LogSetup { level })
}

async fn set_log_setup(
    State(handle): State<LogHandle>,
    Json(setup): Json<LogSetup>,
) -> Result<Json<LogSetup>, (StatusCode, String)> {
    handle
        .set_level(&setup.level)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(setup))
}

/// Routes `GET /log_setup` et `POST /log_setup`
pub fn create_logs_router(handle: LogHandle) -> Router {
    Router::new()
        .route("/log_setup", get(get_log_setup).post(set_log_setup))
        .with_state(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_level() {
        assert_eq!(string_to_level("debug"), Some(Level::DEBUG));
        assert_eq!(string_to_level(" Warning "), Some(Level::WARN));
        assert_eq!(string_to_level("verbose"), None);
    }

    #[test]
    fn test_options_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        config.set_log_min_level("debug".to_string()).unwrap();
        config.set_log_enable_console(false).unwrap();

        let options = LoggingOptions::from_config(&config);
        assert_eq!(options.min_level, Level::DEBUG);
        assert!(!options.enable_console);
    }

    #[test]
    fn test_handle_changes_level() {
        let handle = init_logging(LoggingOptions {
            min_level: Level::INFO,
            enable_console: false,
        });
        if handle.level().is_some() {
            handle.set_level("TRACE").unwrap();
            assert_eq!(handle.level(), Some(LevelFilter::TRACE));
        }
        assert!(handle.set_level("loud").is_err());
    }
}
