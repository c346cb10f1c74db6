//! Enregistrement des échanges d'une session
//!
//! [`CaptureTransport`] s'intercale devant n'importe quel transport : chaque
//! aller-retour, réussi ou non, devient un [`CapturedExchange`] numéroté dans
//! l'ordre des appels.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use pmosoap::{CallContext, Transport, TransportError, TransportResponse, extract_action_name};
use tracing::debug;

use crate::archive::{Archive, CaptureError, CapturedExchange, DEFAULT_COMPRESSION_LEVEL};

/// Session de capture, partageable entre threads (clones légers).
#[derive(Clone, Debug)]
pub struct CaptureSession {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    name: String,
    source_endpoint: Option<String>,
    sequence: AtomicU64,
    exchanges: Mutex<Vec<CapturedExchange>>,
}

impl CaptureSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    /// Session associée à l'endpoint capturé (reporté dans le manifeste).
    pub fn for_endpoint(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::build(name.into(), Some(endpoint.into()))
    }

    fn build(name: String, source_endpoint: Option<String>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                name,
                source_endpoint,
                sequence: AtomicU64::new(1),
                exchanges: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Réserve le prochain numéro de séquence.
    pub fn next_sequence(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::SeqCst)
    }

    /// Ajoute un échange tel quel.
    pub fn record_exchange(&self, exchange: CapturedExchange) {
        debug!(
            "📼 Captured #{} {} (HTTP {})",
            exchange.sequence, exchange.action, exchange.status
        );
        self.inner.exchanges.lock().push(exchange);
    }

    /// Enregistre le résultat d'un aller-retour sous le numéro `sequence`.
    pub fn record(
        &self,
        sequence: u64,
        endpoint: &str,
        request: &[u8],
        result: &Result<TransportResponse, TransportError>,
    ) {
        let action = extract_action_name(request).unwrap_or_default();
        let (status, response, error) = match result {
            Ok(response) => (response.status, response.body.clone(), None),
            Err(err) => (0, Vec::new(), Some(err.to_string())),
        };

        self.record_exchange(CapturedExchange {
            sequence,
            action,
            endpoint: endpoint.to_string(),
            request: request.to_vec(),
            response,
            status,
            error,
            captured_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.inner.exchanges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copie des échanges enregistrés, triés par séquence.
    pub fn exchanges(&self) -> Vec<CapturedExchange> {
        let mut exchanges = self.inner.exchanges.lock().clone();
        exchanges.sort_by_key(|e| e.sequence);
        exchanges
    }

    /// Fige la session en archive.
    pub fn finish(&self) -> Archive {
        Archive::new(
            self.inner.name.clone(),
            self.inner.source_endpoint.clone(),
            self.exchanges(),
        )
    }

    /// Écrit l'archive dans `directory` et retourne son chemin.
    pub fn save(&self, directory: &Path) -> Result<PathBuf, CaptureError> {
        self.save_with_level(directory, DEFAULT_COMPRESSION_LEVEL)
    }

    pub fn save_with_level(&self, directory: &Path, level: i32) -> Result<PathBuf, CaptureError> {
        let archive = self.finish();
        let path = directory.join(archive.file_name());
        archive.write_to_with_level(&path, level)?;
        Ok(path)
    }
}

/// Transport qui enregistre chaque aller-retour dans une [`CaptureSession`].
pub struct CaptureTransport<T> {
    inner: T,
    session: CaptureSession,
}

impl<T: Transport> CaptureTransport<T> {
    pub fn new(inner: T, session: CaptureSession) -> Self {
        Self { inner, session }
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Transport> Transport for CaptureTransport<T> {
    fn round_trip(
        &self,
        address: &str,
        request: &[u8],
        ctx: &CallContext,
    ) -> Result<TransportResponse, TransportError> {
        let sequence = self.session.next_sequence();
        let result = self.inner.round_trip(address, request, ctx);
        self.session.record(sequence, address, request, &result);
        result
    }
}
