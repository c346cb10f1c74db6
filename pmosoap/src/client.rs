//! Client SOAP : encode, signe, envoie, décode
//!
//! Un appel ne fait jamais de nouvelle tentative. Les erreurs de transport
//! restent distinctes des faults renvoyés par le pair, même quand ce fault
//! arrive avec un statut HTTP 4xx/5xx.

use tracing::{debug, warn};
use xmltree::Element;

use crate::action::SoapRequest;
use crate::envelope::{self, Body, EnvelopeError};
use crate::fault::SoapFault;
use crate::payload::{self, PayloadError};
use crate::security::{Credentials, SecurityHeader};
use crate::transport::{CallContext, HttpTransport, Transport, TransportError, TransportResponse};

/// Catégorie d'une [`SoapError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connexion, délai, réponse illisible
    Transport,
    Cancelled,
    /// Fault renvoyé par le pair
    Fault,
    /// La requête n'a pas pu être encodée
    Envelope,
    /// La réponse n'a pas pu être convertie en valeur typée
    Mapping,
}

#[derive(Debug, thiserror::Error)]
pub enum SoapError {
    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Call cancelled")]
    Cancelled,

    #[error("Invalid SOAP response (HTTP {status}): {source}")]
    InvalidResponse {
        status: u16,
        #[source]
        source: EnvelopeError,
    },

    #[error("SOAP fault: {0}")]
    Fault(SoapFault),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] EnvelopeError),

    #[error("Payload mapping failed: {0}")]
    Mapping(#[from] PayloadError),
}

impl From<TransportError> for SoapError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Cancelled => SoapError::Cancelled,
            other => SoapError::Transport(other),
        }
    }
}

impl SoapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SoapError::Transport(_) | SoapError::InvalidResponse { .. } => ErrorKind::Transport,
            SoapError::Cancelled => ErrorKind::Cancelled,
            SoapError::Fault(_) => ErrorKind::Fault,
            SoapError::Encode(_) => ErrorKind::Envelope,
            SoapError::Mapping(_) => ErrorKind::Mapping,
        }
    }

    /// Le fault distant, s'il s'agit d'un fault.
    pub fn fault(&self) -> Option<&SoapFault> {
        match self {
            SoapError::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

/// Client SOAP générique sur un [`Transport`].
pub struct SoapClient<T = HttpTransport> {
    transport: T,
    credentials: Option<Credentials>,
}

impl SoapClient<HttpTransport> {
    pub fn new() -> Self {
        Self::with_transport(HttpTransport::new())
    }
}

impl Default for SoapClient<HttpTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> SoapClient<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            credentials: None,
        }
    }

    /// Active l'authentification : un en-tête neuf est généré à chaque appel.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Invoque une action et retourne l'élément de réponse du corps.
    pub fn invoke(
        &self,
        address: &str,
        payload: &Element,
        ctx: &CallContext,
    ) -> Result<Element, SoapError> {
        ctx.check()?;

        let security = self.credentials.as_ref().map(SecurityHeader::generate);
        let request = envelope::encode(payload, security.as_ref())?;

        debug!("📤 {} -> {}", payload.name, address);
        let response = self.transport.round_trip(address, &request, ctx)?;
        debug!("📥 {} <- {} (HTTP {})", payload.name, address, response.status);

        Self::decode_response(response)
    }

    /// Variante typée utilisée par les mappings par opération.
    pub fn invoke_typed<R: SoapRequest>(
        &self,
        address: &str,
        request: &R,
        ctx: &CallContext,
    ) -> Result<R::Response, SoapError> {
        let action = R::action();
        let payload = payload::to_payload(R::namespace(), R::prefix(), action.as_str(), request)?;
        let response = self.invoke(address, &payload, ctx)?;
        Ok(payload::from_payload(&response)?)
    }

    /// Envoie une enveloppe déjà encodée et retourne la réponse brute.
    pub fn invoke_raw(
        &self,
        address: &str,
        request: &[u8],
        ctx: &CallContext,
    ) -> Result<TransportResponse, SoapError> {
        ctx.check()?;
        Ok(self.transport.round_trip(address, request, ctx)?)
    }

    fn decode_response(response: TransportResponse) -> Result<Element, SoapError> {
        let status = response.status;

        let decoded = match envelope::decode(&response.body) {
            Ok(decoded) => decoded,
            Err(source) => {
                warn!("⚠️ Unparseable SOAP response (HTTP {}): {}", status, source);
                return Err(SoapError::InvalidResponse { status, source });
            }
        };

        match decoded.body {
            Body::Fault(fault) => {
                debug!("❌ SOAP fault (HTTP {}): {}", status, fault);
                Err(SoapError::Fault(fault))
            }
            Body::Action(elem) if response.is_success() => Ok(elem),
            Body::Action(elem) => Err(SoapError::InvalidResponse {
                status,
                source: EnvelopeError::Malformed(format!(
                    "unexpected '{}' with a non-success status",
                    elem.name
                )),
            }),
        }
    }
}
