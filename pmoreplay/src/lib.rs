//! # pmoreplay - Capture et rejeu d'échanges SOAP
//!
//! Enregistre les échanges réels avec une caméra puis les rejoue comme
//! doublure de test déterministe :
//!
//! 1. [`CaptureTransport`] enregistre chaque aller-retour dans une [`CaptureSession`]
//! 2. [`CaptureSession::save`] écrit une [`Archive`] `.tar.zst`
//! 3. [`ReplayMatcher`] recharge l'archive et sert les réponses capturées,
//!    par exemple derrière un `LocalTransport` ou l'hôte HTTP
//!
//! ```rust,ignore
//! let session = CaptureSession::for_endpoint("cam-01", address);
//! let client = SoapClient::with_transport(CaptureTransport::new(HttpTransport::new(), session.clone()));
//! client.invoke(address, &request, &CallContext::new())?;
//! let path = session.save(&capture_dir)?;
//!
//! let replay = SoapClient::with_transport(LocalTransport::new(ReplayMatcher::load(&path)?));
//! ```

pub mod archive;
pub mod capture;
pub mod config_ext;
pub mod matcher;

pub use archive::{Archive, ArchiveManifest, CaptureError, CapturedExchange};
pub use capture::{CaptureSession, CaptureTransport};
pub use config_ext::ReplayConfigExt;
pub use matcher::{MatchStrategy, ReplayError, ReplayMatcher, ReplayedResponse, request_fingerprint};
