//! Archive de capture
//!
//! Une archive est un flux tar compressé en zstd (`.tar.zst`) :
//!
//! ```text
//! manifest.json
//! 0001_GetDeviceInformation.json           métadonnées de l'échange
//! 0001_GetDeviceInformation.request.xml    requête, octet pour octet
//! 0001_GetDeviceInformation.response.xml   réponse, octet pour octet
//! 0002_GetProfiles.json
//! ...
//! ```
//!
//! Écrite une fois, relue en lecture seule et gardée en mémoire.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const ARCHIVE_FORMAT_VERSION: u32 = 1;
pub const ARCHIVE_EXTENSION: &str = "tar.zst";
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const MANIFEST_MEMBER: &str = "manifest.json";
const REQUEST_SUFFIX: &str = ".request.xml";
const RESPONSE_SUFFIX: &str = ".response.xml";

/// Préallocation maximale par membre : la taille de l'en-tête tar n'est
/// qu'une indication.
const MAX_MEMBER_PREALLOC: u64 = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),
}

/// Un échange enregistré, immuable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedExchange {
    /// Rang dans la session, à partir de 1
    pub sequence: u64,
    pub action: String,
    pub endpoint: String,
    pub request: Vec<u8>,
    /// Vide si l'appel a échoué
    pub response: Vec<u8>,
    /// 0 si aucune réponse n'a été reçue
    pub status: u16,
    pub error: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl CapturedExchange {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    fn member_stem(&self) -> String {
        format!("{:04}_{}", self.sequence, sanitize(&self.action))
    }
}

/// Métadonnées d'archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub format_version: u32,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_endpoint: Option<String>,
    pub exchange_count: usize,
}

/// Métadonnées d'un échange (le contenu brut est dans les membres `.xml`)
#[derive(Debug, Serialize, Deserialize)]
struct ExchangeMeta {
    sequence: u64,
    #[serde(default)]
    action: String,
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    captured_at: DateTime<Utc>,
}

/// Archive en mémoire : manifeste et échanges triés par séquence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    manifest: ArchiveManifest,
    exchanges: Vec<CapturedExchange>,
}

impl Archive {
    pub fn new(
        name: impl Into<String>,
        source_endpoint: Option<String>,
        mut exchanges: Vec<CapturedExchange>,
    ) -> Self {
        for exchange in exchanges.iter_mut().filter(|e| e.action.is_empty()) {
            exchange.action = derive_action(&exchange.request);
        }
        exchanges.sort_by_key(|e| e.sequence);
        Self {
            manifest: ArchiveManifest {
                format_version: ARCHIVE_FORMAT_VERSION,
                name: name.into(),
                created_at: Utc::now(),
                source_endpoint,
                exchange_count: exchanges.len(),
            },
            exchanges,
        }
    }

    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn exchanges(&self) -> &[CapturedExchange] {
        &self.exchanges
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    /// Nom de fichier conventionnel : `<name>.tar.zst`
    pub fn file_name(&self) -> String {
        format!("{}.{}", sanitize(&self.manifest.name), ARCHIVE_EXTENSION)
    }

    /// Écrit l'archive dans `path` au niveau de compression par défaut.
    pub fn write_to(&self, path: &Path) -> Result<(), CaptureError> {
        self.write_to_with_level(path, DEFAULT_COMPRESSION_LEVEL)
    }

    pub fn write_to_with_level(&self, path: &Path, level: i32) -> Result<(), CaptureError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = BufWriter::new(File::create(path)?);
        let mut file = self.write(file, level)?;
        file.flush()?;

        info!(
            archive = %path.display(),
            exchanges = self.exchanges.len(),
            "💾 Capture archive written"
        );
        Ok(())
    }

    pub fn to_bytes(&self, level: i32) -> Result<Vec<u8>, CaptureError> {
        self.write(Vec::new(), level)
    }

    fn write<W: Write>(&self, writer: W, level: i32) -> Result<W, CaptureError> {
        let encoder = zstd::Encoder::new(writer, level)?;
        let mut builder = tar::Builder::new(encoder);

        let mtime = self.manifest.created_at.timestamp().max(0) as u64;
        let manifest = ArchiveManifest {
            exchange_count: self.exchanges.len(),
            ..self.manifest.clone()
        };
        append(&mut builder, MANIFEST_MEMBER, &serde_json::to_vec_pretty(&manifest)?, mtime)?;

        for exchange in &self.exchanges {
            let stem = exchange.member_stem();
            let meta = ExchangeMeta {
                sequence: exchange.sequence,
                action: exchange.action.clone(),
                endpoint: exchange.endpoint.clone(),
                status: exchange.status,
                error: exchange.error.clone(),
                captured_at: exchange.captured_at,
            };

            append(&mut builder, &format!("{}.json", stem), &serde_json::to_vec_pretty(&meta)?, mtime)?;
            append(&mut builder, &format!("{}{}", stem, REQUEST_SUFFIX), &exchange.request, mtime)?;
            append(&mut builder, &format!("{}{}", stem, RESPONSE_SUFFIX), &exchange.response, mtime)?;
        }

        let encoder = builder.into_inner()?;
        Ok(encoder.finish()?)
    }

    /// Relit une archive écrite par [`Archive::write_to`].
    pub fn read_from(path: &Path) -> Result<Self, CaptureError> {
        let archive = Self::read(File::open(path)?)?;
        info!(
            archive = %path.display(),
            exchanges = archive.len(),
            "📂 Capture archive loaded"
        );
        Ok(archive)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CaptureError> {
        Self::read(bytes)
    }

    fn read<R: Read>(reader: R) -> Result<Self, CaptureError> {
        let decoder = zstd::Decoder::new(reader)?;
        let mut tar = tar::Archive::new(decoder);

        let mut members: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        for entry in tar.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            let mut data = Vec::with_capacity(entry.size().min(MAX_MEMBER_PREALLOC) as usize);
            entry.read_to_end(&mut data)?;
            members.insert(name, data);
        }

        let manifest: ArchiveManifest = match members.remove(MANIFEST_MEMBER) {
            Some(data) => serde_json::from_slice(&data)?,
            None => return Err(CaptureError::InvalidArchive("missing manifest.json".into())),
        };

        if manifest.format_version > ARCHIVE_FORMAT_VERSION {
            return Err(CaptureError::InvalidArchive(format!(
                "unsupported format version {}",
                manifest.format_version
            )));
        }

        let stems: Vec<String> = members
            .keys()
            .filter_map(|name| name.strip_suffix(".json"))
            .map(str::to_string)
            .collect();

        let mut exchanges = Vec::with_capacity(stems.len());
        for stem in stems {
            let meta: ExchangeMeta = match members.get(&format!("{}.json", stem)) {
                Some(data) => serde_json::from_slice(data)?,
                None => continue,
            };
            let request = members
                .remove(&format!("{}{}", stem, REQUEST_SUFFIX))
                .ok_or_else(|| {
                    CaptureError::InvalidArchive(format!("missing request for {}", stem))
                })?;
            let response = members
                .remove(&format!("{}{}", stem, RESPONSE_SUFFIX))
                .unwrap_or_default();

            let action = if meta.action.is_empty() {
                derive_action(&request)
            } else {
                meta.action
            };

            exchanges.push(CapturedExchange {
                sequence: meta.sequence,
                action,
                endpoint: meta.endpoint,
                request,
                response,
                status: meta.status,
                error: meta.error,
                captured_at: meta.captured_at,
            });
        }

        exchanges.sort_by_key(|e| e.sequence);
        if exchanges.len() != manifest.exchange_count {
            warn!(
                "⚠️ Archive '{}' declares {} exchanges, found {}",
                manifest.name,
                manifest.exchange_count,
                exchanges.len()
            );
        }

        Ok(Self {
            manifest,
            exchanges,
        })
    }
}

/// Nom d'action relu dans la requête brute, vide si illisible.
fn derive_action(request: &[u8]) -> String {
    let derived = pmosoap::extract_action_name(request).unwrap_or_default();
    debug!("🔎 Re-derived action '{}' from request", derived);
    derived
}

fn append<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
    mtime: u64,
) -> Result<(), CaptureError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(mtime);
    builder.append_data(&mut header, path, data)?;
    Ok(())
}

/// Nom utilisable comme membre d'archive ou nom de fichier.
pub(crate) fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(sequence: u64, action: &str) -> CapturedExchange {
        CapturedExchange {
            sequence,
            action: action.to_string(),
            endpoint: "http://192.168.1.10/onvif/device_service".to_string(),
            request: format!("<request seq=\"{}\"/>", sequence).into_bytes(),
            response: format!("<response seq=\"{}\"/>", sequence).into_bytes(),
            status: 200,
            error: None,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("GetProfiles"), "GetProfiles");
        assert_eq!(sanitize("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize(""), "unknown");
    }

    #[test]
    fn test_bytes_round_trip() {
        let archive = Archive::new(
            "session",
            Some("http://camera".to_string()),
            vec![exchange(2, "GetProfiles"), exchange(1, "GetDeviceInformation")],
        );
        assert_eq!(archive.exchanges()[0].sequence, 1);

        let bytes = archive.to_bytes(1).unwrap();
        let restored = Archive::from_bytes(&bytes).unwrap();
        assert_eq!(restored, archive);
        assert_eq!(restored.manifest().exchange_count, 2);
    }

    #[test]
    fn test_sequence_order_survives_many_entries() {
        let exchanges: Vec<_> = (1..=12).rev().map(|i| exchange(i, "GetStatus")).collect();
        let archive = Archive::new("ordered", None, exchanges);
        let restored = Archive::from_bytes(&archive.to_bytes(1).unwrap()).unwrap();

        let sequences: Vec<u64> = restored.exchanges().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_failed_exchange_keeps_error() {
        let mut failed = exchange(1, "GetStreamUri");
        failed.response.clear();
        failed.status = 0;
        failed.error = Some("Request timed out".to_string());

        let archive = Archive::new("failures", None, vec![failed.clone()]);
        let restored = Archive::from_bytes(&archive.to_bytes(1).unwrap()).unwrap();
        assert_eq!(restored.exchanges()[0], failed);
        assert!(restored.exchanges()[0].is_failure());
    }

    #[test]
    fn test_missing_action_is_derived_from_request() {
        let mut anonymous = exchange(1, "");
        anonymous.request = br#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"><s:Body><tds:GetScopes xmlns:tds="http://www.onvif.org/ver10/device/wsdl"/></s:Body></s:Envelope>"#.to_vec();

        let archive = Archive::new("derive", None, vec![anonymous]);
        let restored = Archive::from_bytes(&archive.to_bytes(1).unwrap()).unwrap();
        assert_eq!(restored.exchanges()[0].action, "GetScopes");
    }

    #[test]
    fn test_oversized_member_header_is_an_error() {
        let mut header = tar::Header::new_gnu();
        header.set_path(MANIFEST_MEMBER).unwrap();
        header.set_size(1 << 40);
        header.set_mode(0o644);
        header.set_cksum();

        let mut raw = header.as_bytes().to_vec();
        raw.extend_from_slice(&[0u8; 512]);
        let compressed = zstd::encode_all(raw.as_slice(), 1).unwrap();

        assert!(Archive::from_bytes(&compressed).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(Archive::from_bytes(b"not an archive").is_err());
    }
}
