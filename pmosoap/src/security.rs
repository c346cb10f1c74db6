//! WS-Security UsernameToken (profil PasswordDigest)
//!
//! ```text
//! digest = base64( SHA1( nonce || created || password ) )
//! ```
//!
//! Le client génère un en-tête neuf à chaque appel ; le serveur recalcule le
//! digest à partir du nonce et de la date reçus. Toute erreur de vérification
//! est rapportée sous la même forme, [`AuthError`], pour ne rien révéler.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;
use xmltree::{Element, XMLNode};

use crate::envelope::{EnvelopeError, child_text, element_text};

pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSU_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd";
pub const PASSWORD_DIGEST_TYPE: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest";
pub const BASE64_BINARY_ENCODING: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary";

const NONCE_LEN: usize = 16;

/// Identifiants d'un compte (caméra ou mock).
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Échec d'authentification. Volontairement opaque.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("authentication failed")]
pub struct AuthError;

/// Bloc `wsse:Security` contenant un UsernameToken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityHeader {
    pub username: String,
    /// Digest encodé en base64
    pub password_digest: String,
    pub password_type: String,
    /// Nonce encodé en base64
    pub nonce: String,
    pub nonce_encoding: String,
    /// Date de création, telle que transmise
    pub created: String,
}

impl SecurityHeader {
    /// Génère un en-tête neuf : nonce aléatoire et date courante.
    pub fn generate(credentials: &Credentials) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);
        Self::with_parts(credentials, &nonce, Utc::now())
    }

    /// Construit un en-tête à partir d'un nonce et d'une date donnés.
    pub fn with_parts(credentials: &Credentials, nonce: &[u8], created: DateTime<Utc>) -> Self {
        let created = created.to_rfc3339_opts(SecondsFormat::Millis, true);
        let digest = compute_digest(nonce, &created, &credentials.password);

        Self {
            username: credentials.username.clone(),
            password_digest: BASE64.encode(digest),
            password_type: PASSWORD_DIGEST_TYPE.to_string(),
            nonce: BASE64.encode(nonce),
            nonce_encoding: BASE64_BINARY_ENCODING.to_string(),
            created,
        }
    }

    /// Vérifie l'en-tête contre les identifiants attendus.
    pub fn verify(&self, expected: &Credentials) -> Result<(), AuthError> {
        if !self.password_type.is_empty() && self.password_type != PASSWORD_DIGEST_TYPE {
            tracing::debug!("🔐 Unsupported password type '{}'", self.password_type);
            return Err(AuthError);
        }

        let nonce = BASE64.decode(self.nonce.trim()).map_err(|_| AuthError)?;
        let received = BASE64
            .decode(self.password_digest.trim())
            .map_err(|_| AuthError)?;
        let computed = compute_digest(&nonce, &self.created, &expected.password);

        let user_ok = self.username.as_bytes().ct_eq(expected.username.as_bytes());
        let digest_ok = received.as_slice().ct_eq(computed.as_slice());

        if bool::from(user_ok & digest_ok) {
            Ok(())
        } else {
            Err(AuthError)
        }
    }

    /// Date de création interprétée, si elle est valide.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.created.trim())
            .ok()
            .map(|d| d.with_timezone(&Utc))
    }

    pub(crate) fn to_element(&self) -> Element {
        let mut security = wsse_element("Security");
        security.namespace = Some(WSSE_NS.to_string());

        let mut token = wsse_element("UsernameToken");
        token
            .children
            .push(XMLNode::Element(text_element(wsse_element("Username"), &self.username)));

        let mut password = text_element(wsse_element("Password"), &self.password_digest);
        password
            .attributes
            .insert("Type".to_string(), self.password_type.clone());
        token.children.push(XMLNode::Element(password));

        let mut nonce = text_element(wsse_element("Nonce"), &self.nonce);
        nonce
            .attributes
            .insert("EncodingType".to_string(), self.nonce_encoding.clone());
        token.children.push(XMLNode::Element(nonce));

        let mut created = Element::new("Created");
        created.prefix = Some("wsu".to_string());
        created.namespace = Some(WSU_NS.to_string());
        token
            .children
            .push(XMLNode::Element(text_element(created, &self.created)));

        security.children.push(XMLNode::Element(token));
        security
    }

    pub(crate) fn from_element(security: &Element) -> Result<Self, EnvelopeError> {
        let token = security
            .get_child("UsernameToken")
            .ok_or_else(|| EnvelopeError::InvalidSecurity("missing UsernameToken".into()))?;

        let password = token.get_child("Password");

        Ok(Self {
            username: child_text(token, "Username").unwrap_or_default(),
            password_digest: password.and_then(element_text).unwrap_or_default(),
            password_type: password
                .and_then(|p| p.attributes.get("Type").cloned())
                .unwrap_or_default(),
            nonce: child_text(token, "Nonce").unwrap_or_default(),
            nonce_encoding: token
                .get_child("Nonce")
                .and_then(|n| n.attributes.get("EncodingType").cloned())
                .unwrap_or_default(),
            created: child_text(token, "Created").unwrap_or_default(),
        })
    }
}

/// SHA1(nonce || created || password)
pub fn compute_digest(nonce: &[u8], created: &str, password: &str) -> [u8; 20] {
    let mut sha = Sha1::new();
    sha.update(nonce);
    sha.update(created.as_bytes());
    sha.update(password.as_bytes());
    sha.finalize().into()
}

fn wsse_element(name: &str) -> Element {
    let mut elem = Element::new(name);
    elem.prefix = Some("wsse".to_string());
    elem
}

fn text_element(mut elem: Element, text: &str) -> Element {
    elem.children.push(XMLNode::Text(text.to_string()));
    elem
}

/// Protection optionnelle contre le rejeu d'un en-tête capturé.
///
/// Refuse un `Created` hors de la fenêtre de fraîcheur et un nonce déjà vu
/// parmi les `capacity` derniers. Une fenêtre ou une capacité nulle désactive
/// le contrôle correspondant.
#[derive(Debug)]
pub struct ReplayGuard {
    window: Option<Duration>,
    capacity: usize,
    seen: Mutex<SeenNonces>,
}

#[derive(Debug, Default)]
struct SeenNonces {
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl ReplayGuard {
    pub fn new(window: Option<Duration>, capacity: usize) -> Self {
        Self {
            window: window.filter(|w| !w.is_zero()),
            capacity,
            seen: Mutex::new(SeenNonces::default()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.window.is_some() || self.capacity > 0
    }

    /// À appeler après une vérification réussie du digest.
    pub fn check(&self, header: &SecurityHeader) -> Result<(), AuthError> {
        self.check_at(header, Utc::now())
    }

    pub(crate) fn check_at(
        &self,
        header: &SecurityHeader,
        now: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        if let Some(window) = self.window {
            let created = header.created_at().ok_or(AuthError)?;
            let skew = (now - created).abs().to_std().map_err(|_| AuthError)?;
            if skew > window {
                tracing::debug!("🔐 Stale Created timestamp ({:?} old)", skew);
                return Err(AuthError);
            }
        }

        if self.capacity > 0 {
            let mut seen = self.seen.lock();
            if seen.set.contains(&header.nonce) {
                tracing::debug!("🔐 Nonce reuse detected");
                return Err(AuthError);
            }
            if seen.order.len() >= self.capacity {
                if let Some(oldest) = seen.order.pop_front() {
                    seen.set.remove(&oldest);
                }
            }
            seen.order.push_back(header.nonce.clone());
            seen.set.insert(header.nonce.clone());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn admin() -> Credentials {
        Credentials::new("admin", "password123")
    }

    #[test]
    fn test_digest_is_deterministic() {
        let created = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let a = SecurityHeader::with_parts(&admin(), b"0123456789abcdef", created);
        let b = SecurityHeader::with_parts(&admin(), b"0123456789abcdef", created);

        assert_eq!(a, b);
        assert_eq!(a.created, "2024-01-02T03:04:05.000Z");
        assert_eq!(a.password_type, PASSWORD_DIGEST_TYPE);

        let expected = compute_digest(b"0123456789abcdef", "2024-01-02T03:04:05.000Z", "password123");
        assert_eq!(a.password_digest, BASE64.encode(expected));
    }

    #[test]
    fn test_generated_headers_differ() {
        let a = SecurityHeader::generate(&admin());
        let b = SecurityHeader::generate(&admin());
        assert_ne!(a.nonce, b.nonce);
        assert_eq!(BASE64.decode(&a.nonce).unwrap().len(), NONCE_LEN);
    }

    #[test]
    fn test_verify() {
        let header = SecurityHeader::generate(&admin());
        assert_eq!(header.verify(&admin()), Ok(()));

        let wrong_password = SecurityHeader::generate(&Credentials::new("admin", "wrongpass"));
        assert_eq!(wrong_password.verify(&admin()), Err(AuthError));

        let wrong_user = SecurityHeader::generate(&Credentials::new("root", "password123"));
        assert_eq!(wrong_user.verify(&admin()), Err(AuthError));
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let mut header = SecurityHeader::generate(&admin());
        header.nonce = "!!not base64!!".to_string();
        assert_eq!(header.verify(&admin()), Err(AuthError));

        let mut header = SecurityHeader::generate(&admin());
        header.password_type = "urn:plain-text".to_string();
        assert_eq!(header.verify(&admin()), Err(AuthError));

        let mut header = SecurityHeader::generate(&admin());
        header.created.push('1');
        assert_eq!(header.verify(&admin()), Err(AuthError));
    }

    #[test]
    fn test_element_round_trip() {
        let header = SecurityHeader::generate(&admin());
        let elem = header.to_element();
        assert_eq!(elem.name, "Security");
        assert_eq!(SecurityHeader::from_element(&elem).unwrap(), header);
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let elem = wsse_element("Security");
        assert!(matches!(
            SecurityHeader::from_element(&elem),
            Err(EnvelopeError::InvalidSecurity(_))
        ));
    }

    #[test]
    fn test_guard_rejects_reused_nonce() {
        let guard = ReplayGuard::new(None, 2);
        let a = SecurityHeader::generate(&admin());
        let b = SecurityHeader::generate(&admin());
        let c = SecurityHeader::generate(&admin());

        assert!(guard.check(&a).is_ok());
        assert_eq!(guard.check(&a), Err(AuthError));
        assert!(guard.check(&b).is_ok());
        assert!(guard.check(&c).is_ok());
        // a est sorti du cache borné
        assert!(guard.check(&a).is_ok());
    }

    #[test]
    fn test_guard_freshness_window() {
        let guard = ReplayGuard::new(Some(Duration::from_secs(300)), 0);
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let header = SecurityHeader::with_parts(&admin(), b"nonce", created);

        let soon = created + chrono::Duration::seconds(60);
        let late = created + chrono::Duration::seconds(600);
        assert!(guard.check_at(&header, soon).is_ok());
        assert_eq!(guard.check_at(&header, late), Err(AuthError));
    }

    #[test]
    fn test_disabled_guard() {
        let guard = ReplayGuard::new(Some(Duration::ZERO), 0);
        assert!(!guard.is_active());
        let header = SecurityHeader::generate(&admin());
        assert!(guard.check(&header).is_ok());
        assert!(guard.check(&header).is_ok());
    }

    #[test]
    fn test_credentials_debug_is_redacted() {
        assert!(!format!("{:?}", admin()).contains("password123"));
    }
}
