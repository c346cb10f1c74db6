//! Extension pour intégrer la configuration de l'hôte HTTP dans pmoconfig

use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::{Number, Value};

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_CONTROL_PATH: &str = "/onvif/device_service";

/// Trait d'extension pour la configuration du serveur HTTP
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmoserver::ServerConfigExt;
///
/// let port = get_config().get_server_http_port()?;
/// ```
pub trait ServerConfigExt {
    /// Port d'écoute (défaut: 8080, 0 pour un port éphémère)
    fn get_server_http_port(&self) -> Result<u16>;

    fn set_server_http_port(&self, port: u16) -> Result<()>;

    /// Chemin HTTP du service de contrôle SOAP
    fn get_server_control_path(&self) -> Result<String>;

    fn set_server_control_path(&self, path: String) -> Result<()>;
}

impl ServerConfigExt for Config {
    fn get_server_http_port(&self) -> Result<u16> {
        Ok(self
            .get_u64(&["server", "http_port"])
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_HTTP_PORT))
    }

    fn set_server_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["server", "http_port"], Value::Number(Number::from(port)))
    }

    fn get_server_control_path(&self) -> Result<String> {
        match self.get_value(&["server", "control_path"]) {
            Ok(Value::String(s)) if s.starts_with('/') => Ok(s),
            Ok(Value::String(s)) if !s.is_empty() => Ok(format!("/{}", s)),
            _ => Ok(DEFAULT_CONTROL_PATH.to_string()),
        }
    }

    fn set_server_control_path(&self, path: String) -> Result<()> {
        self.set_value(&["server", "control_path"], Value::String(path))
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
        let (_dir, config) = temp_config();
        assert_eq!(config.get_server_http_port().unwrap(), 8080);
        assert_eq!(
            config.get_server_control_path().unwrap(),
            "/onvif/device_service"
        );
    }

    #[test]
    fn test_port_round_trip() {
        let (_dir, config) = temp_config();
        config.set_server_http_port(0).unwrap();
        assert_eq!(config.get_server_http_port().unwrap(), 0);
    }

    #[test]
    fn test_out_of_range_port_falls_back() {
        let (_dir, config) = temp_config();
        config
            .set_value(&["server", "http_port"], Value::Number(Number::from(70000)))
            .unwrap();
        assert_eq!(config.get_server_http_port().unwrap(), 8080);
    }

    #[test]
    fn test_control_path_gets_leading_slash() {
        let (_dir, config) = temp_config();
        config
            .set_server_control_path("onvif/media_service".to_string())
            .unwrap();
        assert_eq!(
            config.get_server_control_path().unwrap(),
            "/onvif/media_service"
        );
    }
}
