//! Point d'entrée synchrone d'un service SOAP
//!
//! Implémenté par le dispatcher serveur et par le matcher de rejeu ; monté
//! tel quel par l'hôte HTTP ou appelé en mémoire par `LocalTransport`.

use std::sync::Arc;

/// Réponse brute d'un endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl EndpointResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub trait SoapEndpoint: Send + Sync {
    /// Traite une requête. Ne doit jamais paniquer vers l'appelant.
    fn respond(&self, method: &str, body: &[u8]) -> EndpointResponse;
}

impl<E: SoapEndpoint + ?Sized> SoapEndpoint for Arc<E> {
    fn respond(&self, method: &str, body: &[u8]) -> EndpointResponse {
        (**self).respond(method, body)
    }
}

impl<E: SoapEndpoint + ?Sized> SoapEndpoint for Box<E> {
    fn respond(&self, method: &str, body: &[u8]) -> EndpointResponse {
        (**self).respond(method, body)
    }
}
