//! Construction et lecture des éléments d'action
//!
//! Les mappings typés par opération vivent hors de ce crate : ils passent par
//! [`to_payload`] et [`from_payload`], qui s'appuient sur le support serde de
//! quick-xml.

use serde::{Serialize, de::DeserializeOwned};
use xmltree::{Element, XMLNode};

use crate::envelope::{Scope, write_element};

/// Erreur de conversion entre un élément XML et une valeur typée
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Failed to serialize payload: {0}")]
    Serialize(String),

    #[error("Failed to deserialize payload: {0}")]
    Deserialize(String),
}

/// Construit `<prefix:action xmlns:prefix="namespace">` avec des champs texte.
pub fn payload_element(
    namespace: &str,
    prefix: &str,
    action: &str,
    fields: &[(&str, &str)],
) -> Element {
    let mut elem = Element::new(action);
    elem.prefix = Some(prefix.to_string());
    elem.namespace = Some(namespace.to_string());

    for (name, value) in fields {
        let mut field = Element::new(name);
        field.prefix = Some(prefix.to_string());
        field.children.push(XMLNode::Text((*value).to_string()));
        elem.children.push(XMLNode::Element(field));
    }
    elem
}

/// Sérialise `value` sous un élément racine `name` placé dans `namespace`.
pub fn to_payload<T: Serialize>(
    namespace: &str,
    prefix: &str,
    name: &str,
    value: &T,
) -> Result<Element, PayloadError> {
    let xml = quick_xml::se::to_string_with_root(name, value)
        .map_err(|e| PayloadError::Serialize(e.to_string()))?;
    let mut elem =
        Element::parse(xml.as_bytes()).map_err(|e| PayloadError::Serialize(e.to_string()))?;

    elem.prefix = Some(prefix.to_string());
    elem.namespace = Some(namespace.to_string());
    Ok(elem)
}

/// Désérialise un élément reçu ; les préfixes de namespace sont ignorés.
pub fn from_payload<T: DeserializeOwned>(elem: &Element) -> Result<T, PayloadError> {
    let xml = to_local_xml(elem).map_err(|e| PayloadError::Deserialize(e.to_string()))?;
    quick_xml::de::from_str(&xml).map_err(|e| PayloadError::Deserialize(e.to_string()))
}

fn to_local_xml(elem: &Element) -> Result<String, crate::envelope::EnvelopeError> {
    let mut writer = quick_xml::Writer::new(Vec::new());
    write_element(&mut writer, &strip_namespaces(elem), &Scope::new())?;
    String::from_utf8(writer.into_inner())
        .map_err(|e| crate::envelope::EnvelopeError::Write(e.to_string()))
}

fn strip_namespaces(elem: &Element) -> Element {
    let mut local = Element::new(&elem.name);
    local.attributes = elem
        .attributes
        .iter()
        .filter(|(k, _)| *k != "xmlns" && !k.starts_with("xmlns:"))
        .map(|(k, v)| {
            let key = k.rsplit_once(':').map(|(_, l)| l).unwrap_or(k);
            (key.to_string(), v.clone())
        })
        .collect();

    for child in &elem.children {
        match child {
            XMLNode::Element(e) => local.children.push(XMLNode::Element(strip_namespaces(e))),
            XMLNode::Text(t) if !t.trim().is_empty() => {
                local.children.push(XMLNode::Text(t.clone()))
            }
            XMLNode::CData(t) => local.children.push(XMLNode::Text(t.clone())),
            _ => {}
        }
    }
    local
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::child_text;
    use serde::Deserialize;

    const MEDIA_NS: &str = "http://www.onvif.org/ver10/media/wsdl";

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "PascalCase")]
    struct GetStreamUri {
        profile_token: String,
        stream_setup: StreamSetup,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    #[serde(rename_all = "PascalCase")]
    struct StreamSetup {
        stream: String,
    }

    #[test]
    fn test_payload_element() {
        let elem = payload_element(MEDIA_NS, "trt", "GetSnapshotUri", &[("ProfileToken", "p1")]);
        assert_eq!(elem.name, "GetSnapshotUri");
        assert_eq!(elem.prefix.as_deref(), Some("trt"));
        assert_eq!(child_text(&elem, "ProfileToken").unwrap(), "p1");
    }

    #[test]
    fn test_typed_payload() {
        let request = GetStreamUri {
            profile_token: "profile_1".to_string(),
            stream_setup: StreamSetup {
                stream: "RTP-Unicast".to_string(),
            },
        };

        let elem = to_payload(MEDIA_NS, "trt", "GetStreamUri", &request).unwrap();
        assert_eq!(elem.namespace.as_deref(), Some(MEDIA_NS));
        assert_eq!(child_text(&elem, "ProfileToken").unwrap(), "profile_1");

        let back: GetStreamUri = from_payload(&elem).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_prefixed_fields_are_read() {
        let xml = r#"<trt:GetStreamUri xmlns:trt="http://www.onvif.org/ver10/media/wsdl">
            <trt:ProfileToken>p2</trt:ProfileToken>
            <trt:StreamSetup><tt:Stream xmlns:tt="http://www.onvif.org/ver10/schema">RTP-Unicast</tt:Stream></trt:StreamSetup>
        </trt:GetStreamUri>"#;
        let elem = Element::parse(xml.as_bytes()).unwrap();

        let parsed: GetStreamUri = from_payload(&elem).unwrap();
        assert_eq!(parsed.profile_token, "p2");
        assert_eq!(parsed.stream_setup.stream, "RTP-Unicast");
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let elem = payload_element(MEDIA_NS, "trt", "GetStreamUri", &[("ProfileToken", "p1")]);
        assert!(matches!(
            from_payload::<GetStreamUri>(&elem),
            Err(PayloadError::Deserialize(_))
        ));
    }
}
