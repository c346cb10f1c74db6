//! Dispatcher serveur
//!
//! ```text
//! Received -> ActionExtracted -> AuthenticationChecked -> HandlerResolved
//!          -> HandlerExecuted -> ResponseEncoded
//! ```
//!
//! Chaque étape peut court-circuiter vers un fault. Le dispatcher retourne
//! toujours une enveloppe décodable, y compris quand un handler panique.
//!
//! # Exemple
//!
//! ```
//! use pmosoap::{Action, Credentials, SoapServer};
//!
//! let server = SoapServer::builder()
//!     .credentials(Credentials::new("admin", "password123"))
//!     .handler(Action::GetHostname, |req| {
//!         Ok(req.respond_fields(&[("Name", "camera")]))
//!     })
//!     .build();
//!
//! assert!(server.registry().contains(&Action::GetHostname));
//! ```

mod handler;
mod registry;

pub use handler::{ActionHandler, ActionRequest, HandlerError, handler, typed_handler};
pub use registry::HandlerRegistry;

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};
use xmltree::Element;

use crate::action::Action;
use crate::endpoint::{EndpointResponse, SoapEndpoint};
use crate::envelope::{self, Body, declares_namespace};
use crate::fault::{SoapFault, subcodes};
use crate::security::{Credentials, ReplayGuard, SecurityHeader};

/// Statut renvoyé pour une méthode HTTP autre que POST
pub const METHOD_NOT_ALLOWED: u16 = 405;

/// Construction d'un [`SoapServer`]
#[derive(Default)]
pub struct SoapServerBuilder {
    registry: HandlerRegistry,
    credentials: Option<Credentials>,
    replay_guard: Option<ReplayGuard>,
}

impl SoapServerBuilder {
    /// Enregistre un handler brut.
    pub fn handler<F>(mut self, action: impl Into<Action>, f: F) -> Self
    where
        F: Fn(&ActionRequest) -> Result<Element, HandlerError> + Send + Sync + 'static,
    {
        self.insert(action.into(), handler(f));
        self
    }

    /// Enregistre un handler typé (serde en entrée et en sortie).
    pub fn typed_handler<Req, Resp, F>(mut self, action: impl Into<Action>, f: F) -> Self
    where
        Req: DeserializeOwned,
        Resp: Serialize,
        F: Fn(Req) -> Result<Resp, HandlerError> + Send + Sync + 'static,
    {
        self.insert(action.into(), typed_handler(f));
        self
    }

    /// Enregistre un handler déjà construit.
    pub fn action_handler(mut self, action: impl Into<Action>, handler: ActionHandler) -> Self {
        self.insert(action.into(), handler);
        self
    }

    /// Exige un en-tête WS-Security valide pour ces identifiants.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Active le contrôle de fraîcheur et de rejeu des nonces.
    pub fn replay_guard(mut self, guard: ReplayGuard) -> Self {
        self.replay_guard = Some(guard).filter(ReplayGuard::is_active);
        self
    }

    pub fn build(self) -> SoapServer {
        debug!(
            "🧩 SOAP server built with {} handler(s), auth {}",
            self.registry.len(),
            if self.credentials.is_some() { "on" } else { "off" }
        );
        SoapServer {
            registry: self.registry,
            credentials: self.credentials,
            replay_guard: self.replay_guard,
        }
    }

    fn insert(&mut self, action: Action, handler: ActionHandler) {
        if self.registry.insert(action.clone(), handler) {
            warn!("⚠️ Handler for {} replaced", action);
        }
    }
}

/// Serveur SOAP : registre immuable, authentification optionnelle.
#[derive(Debug)]
pub struct SoapServer {
    registry: HandlerRegistry,
    credentials: Option<Credentials>,
    replay_guard: Option<ReplayGuard>,
}

impl SoapServer {
    pub fn builder() -> SoapServerBuilder {
        SoapServerBuilder::default()
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn requires_auth(&self) -> bool {
        self.credentials.is_some()
    }

    /// Traite une requête complète et retourne statut et enveloppe.
    pub fn dispatch(&self, method: &str, body: &[u8]) -> EndpointResponse {
        if !method.eq_ignore_ascii_case("POST") {
            warn!("🚫 Rejected {} request", method);
            return fault_response_with_status(
                METHOD_NOT_ALLOWED,
                &SoapFault::sender("method not allowed").with_detail(method.to_string()),
            );
        }

        match self.process(body) {
            Ok(response) => response,
            Err(fault) => {
                warn!("❌ SOAP fault: {}", fault);
                fault_response(&fault)
            }
        }
    }

    fn process(&self, body: &[u8]) -> Result<EndpointResponse, SoapFault> {
        let name = envelope::extract_action_name(body).map_err(|e| {
            SoapFault::sender("unknown action")
                .with_subcode(subcodes::ACTION)
                .with_detail(e.to_string())
        })?;
        let action = Action::from(name.as_str());
        debug!("🎬 Received SOAP action: {}", action);

        let decoded = envelope::decode(body).map_err(|e| {
            SoapFault::sender("malformed request")
                .with_subcode(subcodes::WELL_FORMED)
                .with_detail(e.to_string())
        })?;

        let username = self.authenticate(
            decoded.security.as_ref(),
            decoded.invalid_security.as_deref(),
        )?;

        let payload = match decoded.body {
            Body::Action(payload) => payload,
            Body::Fault(_) => {
                return Err(SoapFault::sender("unknown action").with_subcode(subcodes::ACTION));
            }
        };

        let handler = self.registry.get(&action).ok_or_else(|| {
            SoapFault::receiver("action not supported")
                .with_subcode(subcodes::ACTION_NOT_SUPPORTED)
                .with_detail(action.as_str().to_string())
        })?;

        let request = ActionRequest {
            action,
            payload,
            username,
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| handler(&request)));

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(HandlerError::Fault(fault))) => return Err(fault),
            Ok(Err(HandlerError::Failed(message))) => {
                return Err(SoapFault::receiver("action failed").with_detail(message));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("💥 Handler for {} panicked: {}", request.action, message);
                return Err(SoapFault::receiver("action failed")
                    .with_detail(format!("handler panicked: {}", message)));
            }
        };

        let response = with_reply_namespace(response, &request);
        let bytes = envelope::encode(&response, None).map_err(|e| {
            SoapFault::receiver("action failed").with_detail(e.to_string())
        })?;

        debug!("✅ {} handled", request.action);
        Ok(EndpointResponse::new(200, bytes))
    }

    /// Le détail d'un échec reste dans les logs : le fault est toujours le
    /// même « authentication failed ».
    fn authenticate(
        &self,
        header: Option<&SecurityHeader>,
        invalid: Option<&str>,
    ) -> Result<Option<String>, SoapFault> {
        let Some(expected) = &self.credentials else {
            if let Some(reason) = invalid {
                debug!("Ignoring unreadable Security header: {}", reason);
            }
            return Ok(header.map(|h| h.username.clone()));
        };

        let auth_failed = || {
            SoapFault::sender("authentication failed").with_subcode(subcodes::NOT_AUTHORIZED)
        };

        if let Some(reason) = invalid {
            debug!("🔒 Unreadable Security header: {}", reason);
            return Err(auth_failed());
        }

        let header = header.ok_or_else(auth_failed)?;
        header.verify(expected).map_err(|_| auth_failed())?;
        if let Some(guard) = &self.replay_guard {
            guard.check(header).map_err(|_| auth_failed())?;
        }

        Ok(Some(header.username.clone()))
    }
}

impl SoapEndpoint for SoapServer {
    fn respond(&self, method: &str, body: &[u8]) -> EndpointResponse {
        self.dispatch(method, body)
    }
}

/// Un handler peut omettre le namespace de sa réponse : elle hérite alors de
/// celui de la requête.
fn with_reply_namespace(mut response: Element, request: &ActionRequest) -> Element {
    if !declares_namespace(&response) {
        let (namespace, prefix) = request.reply_namespace();
        response.namespace = Some(namespace);
        if response.prefix.is_none() {
            response.prefix = Some(prefix);
        }
    }
    response
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Réponse HTTP portant un fault, au statut du binding SOAP 1.2.
pub fn fault_response(fault: &SoapFault) -> EndpointResponse {
    fault_response_with_status(fault.http_status(), fault)
}

fn fault_response_with_status(status: u16, fault: &SoapFault) -> EndpointResponse {
    EndpointResponse::new(status, envelope::encode_fault_or_fallback(fault))
}
