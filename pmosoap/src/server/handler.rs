//! Handlers d'actions côté serveur
//!
//! Un handler reçoit l'[`ActionRequest`] décodée et retourne l'élément de
//! réponse, ou une [`HandlerError`] transformée en fault par le dispatcher.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use xmltree::Element;

use crate::action::Action;
use crate::envelope::child_text;
use crate::fault::{SoapFault, subcodes};
use crate::payload;

/// Requête transmise à un handler
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: Action,

    /// Élément d'action tel que reçu dans le corps
    pub payload: Element,

    /// Utilisateur authentifié, s'il y en a un
    pub username: Option<String>,
}

impl ActionRequest {
    /// Texte d'un champ direct de l'action, par nom local.
    pub fn argument(&self, name: &str) -> Option<String> {
        child_text(&self.payload, name)
    }

    /// Désérialise l'action ; un échec devient un fault Sender/InvalidArgVal.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        payload::from_payload(&self.payload).map_err(|e| HandlerError::invalid_args(e.to_string()))
    }

    /// Construit l'élément `<Action>Response` dans le namespace de la requête.
    pub fn respond<T: Serialize>(&self, value: &T) -> Result<Element, HandlerError> {
        let (namespace, prefix) = self.reply_namespace();
        payload::to_payload(&namespace, &prefix, &self.action.response_name(), value)
            .map_err(|e| HandlerError::Failed(e.to_string()))
    }

    /// Élément `<Action>Response` avec des champs texte.
    pub fn respond_fields(&self, fields: &[(&str, &str)]) -> Element {
        let (namespace, prefix) = self.reply_namespace();
        payload::payload_element(&namespace, &prefix, &self.action.response_name(), fields)
    }

    pub(crate) fn reply_namespace(&self) -> (String, String) {
        let namespace = self
            .payload
            .namespace
            .clone()
            .or_else(|| self.action.service().map(|s| s.namespace().to_string()))
            .unwrap_or_default();
        let prefix = self
            .payload
            .prefix
            .clone()
            .or_else(|| self.action.service().map(|s| s.prefix().to_string()))
            .unwrap_or_else(|| "ns".to_string());
        (namespace, prefix)
    }
}

/// Échec d'un handler
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// Échec interne, rapporté en fault Receiver avec ce message en détail
    #[error("{0}")]
    Failed(String),

    /// Fault explicite renvoyé tel quel
    #[error("{0}")]
    Fault(SoapFault),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    /// Fault Sender `InvalidArgs` (sous-code `ter:InvalidArgVal`).
    pub fn invalid_args(detail: impl Into<String>) -> Self {
        HandlerError::Fault(
            SoapFault::sender("InvalidArgs")
                .with_subcode(subcodes::INVALID_ARG_VAL)
                .with_detail(detail),
        )
    }
}

impl From<SoapFault> for HandlerError {
    fn from(fault: SoapFault) -> Self {
        HandlerError::Fault(fault)
    }
}

/// Handler partagé entre les requêtes concurrentes.
pub type ActionHandler = Arc<dyn Fn(&ActionRequest) -> Result<Element, HandlerError> + Send + Sync>;

/// Enveloppe une closure en [`ActionHandler`].
pub fn handler<F>(f: F) -> ActionHandler
where
    F: Fn(&ActionRequest) -> Result<Element, HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Handler typé : requête désérialisée, réponse sérialisée en `<Action>Response`.
pub fn typed_handler<Req, Resp, F>(f: F) -> ActionHandler
where
    Req: DeserializeOwned,
    Resp: Serialize,
    F: Fn(Req) -> Result<Resp, HandlerError> + Send + Sync + 'static,
{
    Arc::new(move |request: &ActionRequest| {
        let input: Req = request.decode()?;
        let output = f(input)?;
        request.respond(&output)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultCode;
    use crate::payload::payload_element;
    use serde::Deserialize;

    const PTZ_NS: &str = "http://www.onvif.org/ver20/ptz/wsdl";

    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct GotoPreset {
        profile_token: String,
        preset_token: String,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct Ack {
        accepted: bool,
    }

    fn request(fields: &[(&str, &str)]) -> ActionRequest {
        ActionRequest {
            action: Action::GotoPreset,
            payload: payload_element(PTZ_NS, "tptz", "GotoPreset", fields),
            username: None,
        }
    }

    #[test]
    fn test_argument() {
        let req = request(&[("ProfileToken", "p1")]);
        assert_eq!(req.argument("ProfileToken").as_deref(), Some("p1"));
        assert_eq!(req.argument("Speed"), None);
    }

    #[test]
    fn test_typed_handler() {
        let h = typed_handler(|req: GotoPreset| {
            Ok(Ack {
                accepted: req.profile_token == "p1" && req.preset_token == "home",
            })
        });

        let response = h(&request(&[("ProfileToken", "p1"), ("PresetToken", "home")])).unwrap();
        assert_eq!(response.name, "GotoPresetResponse");
        assert_eq!(response.namespace.as_deref(), Some(PTZ_NS));
        assert_eq!(child_text(&response, "Accepted").as_deref(), Some("true"));
    }

    #[test]
    fn test_typed_handler_invalid_args() {
        let h = typed_handler(|_: GotoPreset| Ok(Ack { accepted: true }));
        match h(&request(&[("ProfileToken", "p1")])) {
            Err(HandlerError::Fault(fault)) => {
                assert_eq!(fault.code, FaultCode::Sender);
                assert_eq!(fault.reason, "InvalidArgs");
                assert_eq!(fault.subcode.as_deref(), Some(subcodes::INVALID_ARG_VAL));
            }
            other => panic!("unexpected {:?}", other.map(|e| e.name)),
        }
    }
}
