//! Transport synchrone : envoyer des octets, recevoir des octets
//!
//! Le moteur ne dépend que du trait [`Transport`]. Deux implémentations :
//! - [`HttpTransport`] : POST HTTP via un client `reqwest` partagé ;
//! - [`LocalTransport`] : appel en mémoire d'un [`SoapEndpoint`].
//!
//! L'annulation est coopérative : un [`CallContext`] porte une échéance et un
//! jeton optionnel, vérifiés avant l'envoi et surveillés pendant l'attente.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, after, bounded, never, select};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use crate::endpoint::SoapEndpoint;
use crate::envelope::SOAP_CONTENT_TYPE;

/// Délai par défaut d'un appel HTTP
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Réponse brute du transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Call cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Primitive d'échange utilisée par le client et par l'enregistreur.
pub trait Transport: Send + Sync {
    fn round_trip(
        &self,
        address: &str,
        request: &[u8],
        ctx: &CallContext,
    ) -> Result<TransportResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn round_trip(
        &self,
        address: &str,
        request: &[u8],
        ctx: &CallContext,
    ) -> Result<TransportResponse, TransportError> {
        (**self).round_trip(address, request, ctx)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn round_trip(
        &self,
        address: &str,
        request: &[u8],
        ctx: &CallContext,
    ) -> Result<TransportResponse, TransportError> {
        (**self).round_trip(address, request, ctx)
    }
}

// ============================================================================
// Annulation
// ============================================================================

/// Source d'annulation. Annuler (ou détruire) la source réveille tous les jetons.
#[derive(Debug)]
pub struct Canceller {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl Canceller {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.rx.clone(),
        }
    }

    pub fn cancel(&self) {
        self.tx.lock().take();
    }
}

impl Default for Canceller {
    fn default() -> Self {
        Self::new()
    }
}

/// Jeton observé par les appels en cours.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// Contexte d'un appel : échéance et jeton d'annulation optionnels.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self::new().deadline(deadline)
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Temps restant avant l'échéance (`None` sans échéance).
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
            || self.remaining().is_some_and(|r| r.is_zero())
    }

    /// `Err(Cancelled)` si l'appel ne doit pas (ou plus) avoir lieu.
    pub fn check(&self) -> Result<(), TransportError> {
        if self.is_cancelled() {
            Err(TransportError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// HTTP
// ============================================================================

lazy_static! {
    /// Runtime partagé par tous les [`HttpTransport`]. Une requête y tourne
    /// comme une tâche : l'interrompre ferme sa connexion.
    static ref HTTP_RUNTIME: Option<Runtime> = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("pmosoap-http")
        .enable_all()
        .build()
        .map_err(|e| warn!("⚠️ Failed to start the HTTP runtime: {}", e))
        .ok();
}

/// Transport HTTP basé sur un `reqwest::Client` (connexions réutilisées).
///
/// L'appelant reste bloqué jusqu'à la réponse, l'échéance ou l'annulation ;
/// dans les deux derniers cas la requête en vol est abandonnée et sa
/// connexion fermée.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn round_trip(
        &self,
        address: &str,
        request: &[u8],
        ctx: &CallContext,
    ) -> Result<TransportResponse, TransportError> {
        ctx.check()?;

        let runtime = HTTP_RUNTIME
            .as_ref()
            .ok_or_else(|| TransportError::Unavailable("HTTP runtime not started".to_string()))?;

        // Les statuts 4xx/5xx ne sont pas des erreurs : un fault SOAP arrive
        // avec un 400 ou un 500 et son corps doit être lu.
        let pending = self
            .client
            .post(address)
            .header(CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .timeout(self.timeout)
            .body(request.to_vec());

        // L'échéance de l'appel est surveillée ci-dessous : elle abandonne la
        // tâche au lieu de la laisser expirer d'elle-même.
        let (result_tx, result_rx) = bounded(1);
        let owned_address = address.to_string();
        let task = runtime.spawn(async move {
            let result = post(pending, &owned_address).await;
            let _ = result_tx.send(result);
        });

        let deadline = ctx.remaining().map(after).unwrap_or_else(never);
        let cancel = ctx
            .cancel
            .as_ref()
            .map(|t| t.rx.clone())
            .unwrap_or_else(never);

        select! {
            recv(result_rx) -> result => result.unwrap_or_else(|_| {
                Err(TransportError::Io("request task ended without a response".to_string()))
            }),
            recv(cancel) -> _ => {
                task.abort();
                debug!("🛑 Call to {} cancelled", address);
                Err(TransportError::Cancelled)
            },
            recv(deadline) -> _ => {
                task.abort();
                debug!("⏰ Deadline reached for {}", address);
                Err(TransportError::Cancelled)
            },
        }
    }
}

async fn post(
    pending: reqwest::RequestBuilder,
    address: &str,
) -> Result<TransportResponse, TransportError> {
    let response = pending
        .send()
        .await
        .map_err(|e| map_reqwest_error(address, e))?;

    let status = response.status().as_u16();
    let body = response
        .bytes()
        .await
        .map_err(|e| map_reqwest_error(address, e))?;

    Ok(TransportResponse {
        status,
        body: body.to_vec(),
    })
}

fn map_reqwest_error(address: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect {
            address: address.to_string(),
            reason: err.to_string(),
        }
    } else {
        warn!("⚠️ HTTP error for {}: {}", address, err);
        TransportError::Io(err.to_string())
    }
}

// ============================================================================
// En mémoire
// ============================================================================

/// Transport en mémoire : l'adresse est ignorée, la requête est confiée
/// directement à l'endpoint.
pub struct LocalTransport<E> {
    endpoint: E,
}

impl<E: SoapEndpoint> LocalTransport<E> {
    pub fn new(endpoint: E) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }
}

impl<E: SoapEndpoint> Transport for LocalTransport<E> {
    fn round_trip(
        &self,
        _address: &str,
        request: &[u8],
        ctx: &CallContext,
    ) -> Result<TransportResponse, TransportError> {
        ctx.check()?;
        let response = self.endpoint.respond("POST", request);
        Ok(TransportResponse {
            status: response.status,
            body: response.body,
        })
    }
}
