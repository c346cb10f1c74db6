//! Rejeu d'une archive
//!
//! Pour chaque requête entrante, le nom d'action est extrait puis l'archive
//! est parcourue dans l'ordre : le premier échange de même action gagne et sa
//! réponse est renvoyée sans modification. Une action jamais capturée est une
//! erreur explicite, jamais un succès vide.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use pmosoap::envelope::{self, Body, EnvelopeError};
use pmosoap::{EndpointResponse, SoapEndpoint, SoapFault, fault::subcodes, server::fault_response};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use xmltree::{Element, XMLNode};

use crate::archive::{Archive, CaptureError, CapturedExchange};

/// Stratégie de correspondance requête -> échange capturé
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStrategy {
    /// Premier échange de même action
    #[default]
    ActionOnly,
    /// Premier échange de mêmes action et arguments, sinon premier de même action
    ArgumentsThenAction,
}

impl MatchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::ActionOnly => "action_only",
            MatchStrategy::ArgumentsThenAction => "arguments_then_action",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "action_only" | "action" => Ok(MatchStrategy::ActionOnly),
            "arguments_then_action" | "arguments" => Ok(MatchStrategy::ArgumentsThenAction),
            other => Err(format!("unknown match strategy '{}'", other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Unreadable request: {0}")]
    UnreadableRequest(#[from] EnvelopeError),

    #[error("no capture for action {0}")]
    NoCapture(String),

    #[error("captured call for {action} failed: {error}")]
    CapturedFailure { action: String, error: String },
}

/// Réponse rejouée, identique à la capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedResponse {
    pub sequence: u64,
    pub status: u16,
    pub body: Vec<u8>,
}

/// Matcher en lecture seule sur une archive chargée.
#[derive(Debug)]
pub struct ReplayMatcher {
    archive: Archive,
    strategy: MatchStrategy,
    /// Empreinte des arguments de chaque requête capturée (même index)
    fingerprints: Vec<Option<String>>,
}

impl ReplayMatcher {
    pub fn new(archive: Archive) -> Self {
        let fingerprints = archive
            .exchanges()
            .iter()
            .map(|e| request_fingerprint(&e.request))
            .collect();

        Self {
            archive,
            strategy: MatchStrategy::default(),
            fingerprints,
        }
    }

    pub fn load(path: &Path) -> Result<Self, CaptureError> {
        Ok(Self::new(Archive::read_from(path)?))
    }

    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Échange capturé correspondant à `request`.
    pub fn find(&self, request: &[u8]) -> Result<&CapturedExchange, ReplayError> {
        let action = envelope::extract_action_name(request)?;
        let exchanges = self.archive.exchanges();

        if self.strategy == MatchStrategy::ArgumentsThenAction {
            if let Some(fingerprint) = request_fingerprint(request) {
                let exact = exchanges
                    .iter()
                    .zip(&self.fingerprints)
                    .find(|(e, f)| e.action == action && f.as_deref() == Some(fingerprint.as_str()));
                if let Some((exchange, _)) = exact {
                    return Ok(exchange);
                }
            }
        }

        exchanges
            .iter()
            .find(|e| e.action == action)
            .ok_or(ReplayError::NoCapture(action))
    }

    /// Réponse capturée pour `request`.
    pub fn replay(&self, request: &[u8]) -> Result<ReplayedResponse, ReplayError> {
        let exchange = self.find(request)?;

        if let Some(error) = &exchange.error {
            return Err(ReplayError::CapturedFailure {
                action: exchange.action.clone(),
                error: error.clone(),
            });
        }

        debug!("⏪ Replaying #{} {}", exchange.sequence, exchange.action);
        Ok(ReplayedResponse {
            sequence: exchange.sequence,
            status: exchange.status,
            body: exchange.response.clone(),
        })
    }
}

impl SoapEndpoint for ReplayMatcher {
    fn respond(&self, method: &str, body: &[u8]) -> EndpointResponse {
        if !method.eq_ignore_ascii_case("POST") {
            return EndpointResponse::new(
                405,
                envelope::encode_fault_or_fallback(&SoapFault::sender("method not allowed")),
            );
        }

        match self.replay(body) {
            Ok(replayed) => EndpointResponse::new(replayed.status, replayed.body),
            Err(err) => {
                warn!("❌ Replay miss: {}", err);
                let fault = match err {
                    ReplayError::UnreadableRequest(e) => SoapFault::sender("unknown action")
                        .with_subcode(subcodes::ACTION)
                        .with_detail(e.to_string()),
                    ReplayError::NoCapture(action) => {
                        SoapFault::receiver(format!("no capture for action {}", action))
                            .with_subcode(subcodes::ACTION_NOT_SUPPORTED)
                    }
                    ReplayError::CapturedFailure { action, error } => {
                        SoapFault::receiver(format!("captured call for {} failed", action))
                            .with_detail(error)
                    }
                };
                fault_response(&fault)
            }
        }
    }
}

/// Empreinte SHA-256 de l'élément d'action : noms locaux et textes rognés,
/// dans l'ordre du document. `None` si la requête n'est pas décodable.
pub fn request_fingerprint(request: &[u8]) -> Option<String> {
    match envelope::decode(request).ok()?.body {
        Body::Action(payload) => {
            let mut hasher = Sha256::new();
            feed(&mut hasher, &payload);
            Some(hex::encode(hasher.finalize()))
        }
        Body::Fault(_) => None,
    }
}

fn feed(hasher: &mut Sha256, elem: &Element) {
    hasher.update(b"<");
    hasher.update(elem.name.as_bytes());
    hasher.update(b">");
    for child in &elem.children {
        match child {
            XMLNode::Element(e) => feed(hasher, e),
            XMLNode::Text(t) | XMLNode::CData(t) => {
                let t = t.trim();
                if !t.is_empty() {
                    hasher.update(b"\"");
                    hasher.update(t.as_bytes());
                    hasher.update(b"\"");
                }
            }
            _ => {}
        }
    }
    hasher.update(b"</>");
}
