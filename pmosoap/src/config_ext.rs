//! Extension pour intégrer la configuration SOAP dans pmoconfig
//!
//! Ce module fournit le trait `SoapConfigExt` qui ajoute à
//! `pmoconfig::Config` les réglages du client et du serveur SOAP :
//! délai d'appel, identifiants, protection contre le rejeu.

use std::time::Duration;

use anyhow::Result;
use pmoconfig::Config;
use serde_yaml::{Number, Value};

use crate::security::{Credentials, ReplayGuard};
use crate::transport::DEFAULT_TIMEOUT;

/// Trait d'extension pour la configuration SOAP
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmosoap::{HttpTransport, SoapClient, SoapConfigExt};
///
/// let config = get_config();
/// let mut client = SoapClient::with_transport(HttpTransport::with_timeout(
///     config.get_soap_call_timeout()?,
/// ));
/// if let Some(creds) = config.get_soap_credentials()? {
///     client = client.with_credentials(creds);
/// }
/// ```
pub trait SoapConfigExt {
    /// Délai d'un appel (défaut: 5 s)
    fn get_soap_call_timeout(&self) -> Result<Duration>;

    fn set_soap_call_timeout(&self, timeout: Duration) -> Result<()>;

    /// Identifiants configurés ; `None` si aucun utilisateur n'est défini.
    ///
    /// Le mot de passe est déchiffré s'il est stocké chiffré.
    fn get_soap_credentials(&self) -> Result<Option<Credentials>>;

    /// Enregistre les identifiants, mot de passe chiffré.
    fn set_soap_credentials(&self, credentials: &Credentials) -> Result<()>;

    /// Protection contre le rejeu ; `None` tant que fenêtre et cache sont à 0.
    fn get_soap_replay_guard(&self) -> Result<Option<ReplayGuard>>;
}

impl SoapConfigExt for Config {
    fn get_soap_call_timeout(&self) -> Result<Duration> {
        match self.get_u64(&["soap", "call_timeout_ms"]) {
            Some(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
            _ => Ok(DEFAULT_TIMEOUT),
        }
    }

    fn set_soap_call_timeout(&self, timeout: Duration) -> Result<()> {
        self.set_value(
            &["soap", "call_timeout_ms"],
            Value::Number(Number::from(timeout.as_millis() as u64)),
        )
    }

    fn get_soap_credentials(&self) -> Result<Option<Credentials>> {
        let username = match self.get_value(&["soap", "credentials", "username"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => return Ok(None),
        };
        let password = self
            .get_secret(&["soap", "credentials", "password"])?
            .unwrap_or_default();
        Ok(Some(Credentials::new(username, password)))
    }

    fn set_soap_credentials(&self, credentials: &Credentials) -> Result<()> {
        self.set_value(
            &["soap", "credentials", "username"],
            Value::String(credentials.username.clone()),
        )?;
        self.set_secret(&["soap", "credentials", "password"], &credentials.password)
    }

    fn get_soap_replay_guard(&self) -> Result<Option<ReplayGuard>> {
        let window = self
            .get_u64(&["soap", "auth", "freshness_window_secs"])
            .unwrap_or(0);
        let capacity = self
            .get_u64(&["soap", "auth", "nonce_cache_size"])
            .unwrap_or(0);

        let guard = ReplayGuard::new(Some(Duration::from_secs(window)), capacity as usize);
        Ok(Some(guard).filter(ReplayGuard::is_active))
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
        assert_eq!(config.get_soap_call_timeout().unwrap(), Duration::from_secs(5));
        assert!(config.get_soap_credentials().unwrap().is_none());
        assert!(config.get_soap_replay_guard().unwrap().is_none());
    }

    #[test]
    fn test_timeout_round_trip() {
        let (_dir, config) = temp_config();
        config
            .set_soap_call_timeout(Duration::from_millis(1500))
            .unwrap();
        assert_eq!(
            config.get_soap_call_timeout().unwrap(),
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_plaintext_credentials() {
        let (_dir, config) = temp_config();
        config
            .set_value(&["soap", "credentials", "username"], Value::String("admin".into()))
            .unwrap();
        config
            .set_value(
                &["soap", "credentials", "password"],
                Value::String("password123".into()),
            )
            .unwrap();

        let creds = config.get_soap_credentials().unwrap().unwrap();
        assert_eq!(creds, Credentials::new("admin", "password123"));
    }

    #[test]
    fn test_replay_guard_enabled() {
        let (_dir, config) = temp_config();
        config
            .set_value(
                &["soap", "auth", "nonce_cache_size"],
                Value::Number(Number::from(128u64)),
            )
            .unwrap();
        assert!(config.get_soap_replay_guard().unwrap().is_some());
    }
}
