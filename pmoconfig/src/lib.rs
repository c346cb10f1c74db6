//! # Configuration du moteur SOAP
//!
//! Ce module gère la configuration partagée par les crates du workspace :
//! - Chargement depuis un fichier YAML (`config.yaml`)
//! - Fusion avec la configuration par défaut embarquée
//! - Surcharges par variables d'environnement (`PMOSOAP_CONFIG__SECTION__KEY`)
//! - Getters/setters typés
//! - Accès global via un singleton paresseux
//!
//! Chaque crate ajoute ses propres accesseurs via un trait d'extension
//! (`SoapConfigExt`, `ReplayConfigExt`, `ServerConfigExt`).
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::get_config;
//!
//! let config = get_config();
//! let level = config.get_log_min_level()?;
//! config.set_log_enable_console(false)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

pub mod secrets;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmosoap.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load pmosoap configuration"));
}

const ENV_CONFIG_DIR: &str = "PMOSOAP_CONFIG";
const ENV_PREFIX: &str = "PMOSOAP_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmosoap";

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Génère un getter/setter pour un booléen avec défaut.
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> anyhow::Result<bool> {
            match self.get_value($path) {
                Ok(serde_yaml::Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> anyhow::Result<()> {
            self.set_value($path, serde_yaml::Value::Bool(value))
        }
    };
}

/// Génère un getter/setter pour une chaîne avec défaut.
///
/// Une chaîne vide est traitée comme absente.
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> anyhow::Result<String> {
            match self.get_value($path) {
                Ok(serde_yaml::Value::String(s)) if !s.is_empty() => Ok(s),
                _ => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: String) -> anyhow::Result<()> {
            self.set_value($path, serde_yaml::Value::String(value))
        }
    };
}

/// Gestionnaire de configuration.
///
/// La configuration est conservée sous forme d'arbre YAML protégé par un
/// mutex ; chaque modification est immédiatement persistée dans
/// `config.yaml`.
#[derive(Debug)]
pub struct Config {
    config_dir: PathBuf,
    path: PathBuf,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(self.data.lock().clone()),
        }
    }
}

impl Config {
    /// Cherche le répertoire de configuration dans l'ordre :
    /// argument, variable `PMOSOAP_CONFIG`, `./.pmosoap`, `~/.pmosoap`.
    fn find_config_dir(directory: &str) -> PathBuf {
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return PathBuf::from(env_path);
        }

        let local = Path::new(CONFIG_DIR_NAME);
        if local.exists() {
            return local.to_path_buf();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        local.to_path_buf()
    }

    /// Crée le répertoire si besoin et vérifie qu'il est lisible et inscriptible.
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)?;

        Ok(())
    }

    /// Détermine et valide le répertoire de configuration.
    pub fn config_dir(directory: &str) -> Result<PathBuf> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(&dir_path)?;
        Ok(dir_path)
    }

    /// Charge la configuration depuis `directory` (ou l'emplacement par défaut).
    ///
    /// 1. Charge la configuration embarquée
    /// 2. Fusionne le `config.yaml` externe s'il existe
    /// 3. Applique les surcharges d'environnement
    /// 4. Sauvegarde le résultat fusionné
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join("config.yaml");

        let mut merged = lower_keys_value(serde_yaml::from_str(DEFAULT_CONFIG)?);

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                let external: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut merged, &lower_keys_value(external));
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using embedded defaults");
            }
        }

        let mut config_value = merged;
        apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Répertoire dans lequel la configuration a été chargée.
    pub fn directory(&self) -> &Path {
        &self.config_dir
    }

    /// Sauvegarde la configuration courante dans `config.yaml`.
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.data.lock())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Définit une valeur au chemin donné (ex: `&["soap", "call_timeout_ms"]`) et sauvegarde.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data.lock();
            set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    /// Lit la valeur au chemin donné.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock();
        get_value_internal(&data, path)
    }

    /// Lit un entier non signé, en acceptant aussi une chaîne numérique.
    pub fn get_u64(&self, path: &[&str]) -> Option<u64> {
        match self.get_value(path).ok()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Résout un chemin relatif au répertoire de configuration et le crée.
    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<PathBuf> {
        let path = Path::new(dir_path);
        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory = %absolute_path.display(), "Created managed directory");
        }

        Ok(absolute_path)
    }

    /// Récupère un répertoire géré par la configuration, créé si nécessaire.
    ///
    /// Le chemin configuré peut être absolu ou relatif au répertoire de
    /// configuration. Si la clé est absente, `default` est enregistré.
    pub fn get_managed_dir(&self, path: &[&str], default: &str) -> Result<PathBuf> {
        let dir_path = match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => {
                self.set_managed_dir(path, default.to_string())?;
                default.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    pub fn set_managed_dir(&self, path: &[&str], directory: String) -> Result<()> {
        self.set_value(path, Value::String(directory))
    }

    /// Lit un secret (mot de passe) en le déchiffrant s'il est stocké chiffré.
    ///
    /// Retourne `None` si la clé est absente ou vide.
    pub fn get_secret(&self, path: &[&str]) -> Result<Option<String>> {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => Ok(Some(secrets::reveal(&s)?)),
            _ => Ok(None),
        }
    }

    /// Stocke un secret chiffré avec la clé de la machine.
    pub fn set_secret(&self, path: &[&str], plaintext: &str) -> Result<()> {
        let sealed = secrets::seal(plaintext)?;
        self.set_value(path, Value::String(sealed))
    }

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );
}

/// Retourne l'instance globale, chargée au premier accès.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    if let Value::Mapping(map) = data {
        let key_value = Value::String(path[0].to_lowercase());
        if path.len() == 1 {
            map.insert(key_value, value);
        } else {
            let entry = map
                .entry(key_value)
                .or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, &path[1..], value)?;
        }
        Ok(())
    } else {
        Err(anyhow!("Current node is not a map"))
    }
}

fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        match current {
            Value::Mapping(map) => match map.get(Value::String(key.to_lowercase())) {
                Some(next) => current = next,
                None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
            },
            _ => return Err(anyhow!("Path {} is not a map", path[..i].join("."))),
        }
    }
    Ok(current.clone())
}

fn apply_env_overrides(config: &mut Value) {
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
            let key_path = stripped.split("__").collect::<Vec<_>>();
            if let Err(e) = set_value_internal(config, &key_path, convert_env_value(&value)) {
                tracing::warn!(env_var = %key, "Ignoring config override: {}", e);
            }
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let key = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(key, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Fusionne récursivement `external` dans `default`.
///
/// Les mappings sont fusionnés clé par clé ; scalaires et séquences sont remplacés.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn number(value: u64) -> Value {
        Value::Number(serde_yaml::Number::from(value))
    }

    fn temp_config() -> (tempfile::TempDir, Config) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        (dir, config)
    }

    #[test]
    fn test_defaults_are_loaded() {
        let (_dir, config) = temp_config();
        assert_eq!(config.get_u64(&["soap", "call_timeout_ms"]), Some(5000));
        assert_eq!(config.get_log_min_level().unwrap(), "INFO");
        assert!(config.get_log_enable_console().unwrap());
    }

    #[test]
    fn test_external_file_is_merged() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("config.yaml"),
            "soap:\n  Call_Timeout_Ms: 1500\n",
        )
        .unwrap();

        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(config.get_u64(&["soap", "call_timeout_ms"]), Some(1500));
        // Les autres clés par défaut restent présentes
        assert_eq!(config.get_u64(&["server", "http_port"]), Some(8080));
    }

    #[test]
    fn test_set_value_is_persisted() {
        let (dir, config) = temp_config();
        config.set_log_min_level("DEBUG".to_string()).unwrap();

        let reloaded = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(reloaded.get_log_min_level().unwrap(), "DEBUG");
    }

    #[test]
    fn test_env_override_is_applied() {
        env::set_var("PMOSOAP_CONFIG__TESTONLY__RETRIES", "7");
        let (_dir, config) = temp_config();
        env::remove_var("PMOSOAP_CONFIG__TESTONLY__RETRIES");
        assert_eq!(config.get_u64(&["testonly", "retries"]), Some(7));
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let (_dir, config) = temp_config();
        assert!(config.get_value(&["nope", "missing"]).is_err());
    }

    #[test]
    fn test_managed_dir_is_created_relative_to_config() {
        let (dir, config) = temp_config();
        let captures = config
            .get_managed_dir(&["replay", "capture", "directory"], "captures")
            .unwrap();
        assert!(captures.starts_with(dir.path()));
        assert!(captures.is_dir());
    }

    #[test]
    fn test_merge_yaml_replaces_scalars() {
        let mut default: Value = serde_yaml::from_str("a: 1\nb:\n  c: 2\n").unwrap();
        let external: Value = serde_yaml::from_str("b:\n  c: 3\n  d: 4\n").unwrap();
        merge_yaml(&mut default, &external);
        assert_eq!(get_value_internal(&default, &["a"]).unwrap(), number(1));
        assert_eq!(get_value_internal(&default, &["b", "c"]).unwrap(), number(3));
        assert_eq!(get_value_internal(&default, &["b", "d"]).unwrap(), number(4));
    }
}
