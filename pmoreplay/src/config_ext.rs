//! Extension pour intégrer la configuration de capture/rejeu dans pmoconfig

use std::path::PathBuf;

use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::{Number, Value};
use tracing::warn;

use crate::archive::DEFAULT_COMPRESSION_LEVEL;
use crate::matcher::MatchStrategy;

const DEFAULT_CAPTURE_DIR: &str = "captures";

/// Trait d'extension pour la configuration de capture et de rejeu
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmoreplay::{ReplayConfigExt, ReplayMatcher};
///
/// let config = get_config();
/// let path = config.get_replay_capture_dir()?.join("cam-01.tar.zst");
/// let matcher = ReplayMatcher::load(&path)?.with_strategy(config.get_replay_match_strategy()?);
/// ```
pub trait ReplayConfigExt {
    /// Répertoire des archives, relatif au répertoire de configuration (défaut: "captures")
    fn get_replay_capture_dir(&self) -> Result<PathBuf>;

    fn set_replay_capture_dir(&self, directory: String) -> Result<()>;

    /// Stratégie de correspondance (défaut: action seule)
    fn get_replay_match_strategy(&self) -> Result<MatchStrategy>;

    fn set_replay_match_strategy(&self, strategy: MatchStrategy) -> Result<()>;

    /// Niveau de compression zstd des archives (défaut: 3)
    fn get_replay_compression_level(&self) -> Result<i32>;
}

impl ReplayConfigExt for Config {
    fn get_replay_capture_dir(&self) -> Result<PathBuf> {
        self.get_managed_dir(&["replay", "capture", "directory"], DEFAULT_CAPTURE_DIR)
    }

    fn set_replay_capture_dir(&self, directory: String) -> Result<()> {
        self.set_managed_dir(&["replay", "capture", "directory"], directory)
    }

    fn get_replay_match_strategy(&self) -> Result<MatchStrategy> {
        match self.get_value(&["replay", "match_strategy"]) {
            Ok(Value::String(s)) => Ok(s.parse().unwrap_or_else(|e| {
                warn!("⚠️ {}, using {}", e, MatchStrategy::default());
                MatchStrategy::default()
            })),
            _ => Ok(MatchStrategy::default()),
        }
    }

    fn set_replay_match_strategy(&self, strategy: MatchStrategy) -> Result<()> {
        self.set_value(
            &["replay", "match_strategy"],
            Value::String(strategy.as_str().to_string()),
        )
    }

    fn get_replay_compression_level(&self) -> Result<i32> {
        match self.get_value(&["replay", "compression_level"]) {
            Ok(Value::Number(n)) => Ok(n
                .as_i64()
                .map(|l| l.clamp(1, 22) as i32)
                .unwrap_or(DEFAULT_COMPRESSION_LEVEL)),
            _ => Ok(DEFAULT_COMPRESSION_LEVEL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        (dir, config)
    }

    #[test]
    fn test_defaults() {
        let (dir, config) = temp_config();
        let captures = config.get_replay_capture_dir().unwrap();
        assert_eq!(captures, dir.path().join("captures"));
        assert!(captures.is_dir());
        assert_eq!(
            config.get_replay_match_strategy().unwrap(),
            MatchStrategy::ActionOnly
        );
        assert_eq!(config.get_replay_compression_level().unwrap(), 3);
    }

    #[test]
    fn test_strategy_round_trip() {
        let (_dir, config) = temp_config();
        config
            .set_replay_match_strategy(MatchStrategy::ArgumentsThenAction)
            .unwrap();
        assert_eq!(
            config.get_replay_match_strategy().unwrap(),
            MatchStrategy::ArgumentsThenAction
        );
    }

    #[test]
    fn test_compression_level_is_clamped() {
        let (_dir, config) = temp_config();
        config
            .set_value(
                &["replay", "compression_level"],
                Value::Number(Number::from(99)),
            )
            .unwrap();
        assert_eq!(config.get_replay_compression_level().unwrap(), 22);
    }
}
