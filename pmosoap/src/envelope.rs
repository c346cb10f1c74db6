//! Enveloppe SOAP : encodage, décodage et extraction du nom d'action
//!
//! ```text
//! <s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
//!   <s:Header>                      (optionnel, au plus un bloc Security)
//!     <wsse:Security>...</wsse:Security>
//!   </s:Header>
//!   <s:Body>
//!     <tds:GetDeviceInformation xmlns:tds="..."/>   (action OU s:Fault)
//!   </s:Body>
//! </s:Envelope>
//! ```
//!
//! Le décodage se fait sur les noms locaux : une enveloppe SOAP 1.1 est
//! acceptée au même titre qu'une enveloppe SOAP 1.2.

use std::collections::BTreeMap;
use std::io::Cursor;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use xmltree::{Element, XMLNode};

use crate::fault::SoapFault;
use crate::security::SecurityHeader;

/// Namespace de l'enveloppe SOAP 1.2
pub const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Préfixe utilisé pour l'enveloppe émise
pub const SOAP_PREFIX: &str = "s";

/// Content-Type du binding HTTP SOAP 1.2
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// Enveloppe le fault produit si la sérialisation d'un fault échoue elle-même.
pub const FALLBACK_FAULT: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\"><s:Body><s:Fault><s:Code><s:Value>s:Receiver</s:Value></s:Code><s:Reason><s:Text xml:lang=\"en\">internal error</s:Text></s:Reason></s:Fault></s:Body></s:Envelope>";

/// Erreur de codage ou de décodage d'enveloppe
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("XML parse error: {0}")]
    Malformed(String),

    #[error("Missing SOAP Envelope")]
    MissingEnvelope,

    #[error("No action found in SOAP Body")]
    NoAction,

    #[error("Payload element '{0}' does not declare its namespace")]
    MissingNamespace(String),

    #[error("Invalid Security header: {0}")]
    InvalidSecurity(String),

    #[error("XML write error: {0}")]
    Write(String),
}

impl From<xmltree::ParseError> for EnvelopeError {
    fn from(err: xmltree::ParseError) -> Self {
        EnvelopeError::Malformed(err.to_string())
    }
}

impl From<quick_xml::Error> for EnvelopeError {
    fn from(err: quick_xml::Error) -> Self {
        EnvelopeError::Malformed(err.to_string())
    }
}

impl From<std::io::Error> for EnvelopeError {
    fn from(err: std::io::Error) -> Self {
        EnvelopeError::Write(err.to_string())
    }
}

/// Contenu du corps : exactement une action ou un fault.
#[derive(Debug, Clone)]
pub enum Body {
    Action(Element),
    Fault(SoapFault),
}

/// Enveloppe SOAP décodée
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Bloc WS-Security de l'en-tête, s'il est présent
    pub security: Option<SecurityHeader>,

    /// Bloc Security présent mais illisible. Jamais une erreur de décodage :
    /// le dispatcher en fait un échec d'authentification.
    pub invalid_security: Option<String>,

    pub body: Body,
}

impl Envelope {
    pub fn action(payload: Element) -> Self {
        Self {
            security: None,
            invalid_security: None,
            body: Body::Action(payload),
        }
    }

    pub fn fault(fault: SoapFault) -> Self {
        Self {
            security: None,
            invalid_security: None,
            body: Body::Fault(fault),
        }
    }

    pub fn with_security(mut self, security: SecurityHeader) -> Self {
        self.security = Some(security);
        self
    }

    /// Nom local de l'élément porté par le corps.
    pub fn action_name(&self) -> &str {
        match &self.body {
            Body::Action(elem) => &elem.name,
            Body::Fault(_) => "Fault",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        match &self.body {
            Body::Action(payload) => encode(payload, self.security.as_ref()),
            Body::Fault(fault) => write_envelope(&fault.to_element(), self.security.as_ref()),
        }
    }
}

/// Encode `payload` dans une enveloppe, avec un bloc Security optionnel.
///
/// L'élément racine du payload doit déclarer son namespace, sans quoi le
/// message ne peut pas être routé par le destinataire.
pub fn encode(
    payload: &Element,
    security: Option<&SecurityHeader>,
) -> Result<Vec<u8>, EnvelopeError> {
    if !declares_namespace(payload) {
        return Err(EnvelopeError::MissingNamespace(payload.name.clone()));
    }
    write_envelope(payload, security)
}

/// Encode une enveloppe dont le corps est un fault.
pub fn encode_fault(fault: &SoapFault) -> Result<Vec<u8>, EnvelopeError> {
    write_envelope(&fault.to_element(), None)
}

/// Comme [`encode_fault`], en retombant sur [`FALLBACK_FAULT`] en cas d'échec.
pub fn encode_fault_or_fallback(fault: &SoapFault) -> Vec<u8> {
    encode_fault(fault).unwrap_or_else(|e| {
        tracing::error!("❌ Failed to encode SOAP fault: {}", e);
        FALLBACK_FAULT.as_bytes().to_vec()
    })
}

/// Décode une enveloppe complète.
pub fn decode(xml: &[u8]) -> Result<Envelope, EnvelopeError> {
    let root = Element::parse(xml)?;

    if root.name != "Envelope" {
        return Err(EnvelopeError::MissingEnvelope);
    }

    let (security, invalid_security) = match root
        .get_child("Header")
        .and_then(|header| header.get_child("Security"))
        .map(SecurityHeader::from_element)
    {
        Some(Ok(header)) => (Some(header), None),
        Some(Err(e)) => (None, Some(e.to_string())),
        None => (None, None),
    };

    let body = root.get_child("Body").ok_or(EnvelopeError::NoAction)?;
    let child = body
        .children
        .iter()
        .find_map(|n| n.as_element())
        .ok_or(EnvelopeError::NoAction)?;

    let body = if child.name == "Fault" {
        Body::Fault(SoapFault::from_element(child))
    } else {
        Body::Action(child.clone())
    };

    Ok(Envelope {
        security,
        invalid_security,
        body,
    })
}

/// Retourne le nom local du premier élément sous `Body`.
///
/// Lecture en flux : on s'arrête dès la balise ouvrante de l'action, sans
/// exiger que ses champs soient bien formés.
pub fn extract_action_name(xml: &[u8]) -> Result<String, EnvelopeError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut depth = 0usize;
    let mut in_body = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                depth += 1;
                if in_body {
                    return local_name(&e);
                }
                if depth == 2 && e.local_name().as_ref() == b"Body" {
                    in_body = true;
                }
            }
            Event::Empty(e) => {
                if in_body {
                    return local_name(&e);
                }
                if depth == 1 && e.local_name().as_ref() == b"Body" {
                    return Err(EnvelopeError::NoAction);
                }
            }
            Event::End(_) => {
                if in_body && depth == 2 {
                    return Err(EnvelopeError::NoAction);
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => return Err(EnvelopeError::NoAction),
            _ => {}
        }
        buf.clear();
    }
}

fn local_name(e: &BytesStart<'_>) -> Result<String, EnvelopeError> {
    std::str::from_utf8(e.local_name().as_ref())
        .map(str::to_string)
        .map_err(|err| EnvelopeError::Malformed(err.to_string()))
}

/// Vrai si l'élément porte un namespace résolu ou une déclaration `xmlns`.
pub(crate) fn declares_namespace(elem: &Element) -> bool {
    elem.namespace.as_deref().is_some_and(|ns| !ns.is_empty())
        || elem
            .attributes
            .keys()
            .any(|k| k == "xmlns" || k.starts_with("xmlns:"))
}

fn write_envelope(
    body_child: &Element,
    security: Option<&SecurityHeader>,
) -> Result<Vec<u8>, EnvelopeError> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let envelope_name = format!("{}:Envelope", SOAP_PREFIX);
    let mut envelope = BytesStart::new(envelope_name.as_str());
    envelope.push_attribute((format!("xmlns:{}", SOAP_PREFIX).as_str(), SOAP_ENV_NS));
    writer.write_event(Event::Start(envelope))?;

    let mut scope = Scope::new();
    scope.insert(SOAP_PREFIX.to_string(), SOAP_ENV_NS.to_string());

    if let Some(header) = security {
        let header_name = format!("{}:Header", SOAP_PREFIX);
        writer.write_event(Event::Start(BytesStart::new(header_name.as_str())))?;
        write_element(&mut writer, &header.to_element(), &scope)?;
        writer.write_event(Event::End(BytesEnd::new(header_name.as_str())))?;
    }

    let body_name = format!("{}:Body", SOAP_PREFIX);
    writer.write_event(Event::Start(BytesStart::new(body_name.as_str())))?;
    write_element(&mut writer, body_child, &scope)?;
    writer.write_event(Event::End(BytesEnd::new(body_name.as_str())))?;

    writer.write_event(Event::End(BytesEnd::new(envelope_name.as_str())))?;
    Ok(writer.into_inner().into_inner())
}

/// Préfixes de namespace visibles (préfixe -> URI, "" pour le namespace par défaut).
pub(crate) type Scope = BTreeMap<String, String>;

/// Sérialise un élément xmltree en émettant les déclarations de namespace
/// manquantes dans la portée courante.
pub(crate) fn write_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    elem: &Element,
    parent_scope: &Scope,
) -> Result<(), EnvelopeError> {
    let qualified = match &elem.prefix {
        Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, elem.name),
        _ => elem.name.clone(),
    };

    let mut start = BytesStart::new(qualified.as_str());
    let mut scope = parent_scope.clone();

    let declare = |prefix: &str, uri: &str, start: &mut BytesStart<'_>, scope: &mut Scope| {
        if scope.get(prefix).map(String::as_str) == Some(uri) {
            return;
        }
        let attr = if prefix.is_empty() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{}", prefix)
        };
        start.push_attribute((attr.as_str(), uri));
        scope.insert(prefix.to_string(), uri.to_string());
    };

    if let Some(namespaces) = &elem.namespaces {
        for (prefix, uri) in namespaces.0.iter() {
            if prefix == "xml" || prefix == "xmlns" || uri.is_empty() {
                continue;
            }
            declare(prefix, uri, &mut start, &mut scope);
        }
    }

    for (key, value) in &elem.attributes {
        if key == "xmlns" || key.starts_with("xmlns:") {
            let prefix = key.strip_prefix("xmlns:").unwrap_or("");
            declare(prefix, value, &mut start, &mut scope);
        }
    }

    if let Some(ns) = elem.namespace.as_deref().filter(|ns| !ns.is_empty()) {
        let prefix = elem.prefix.clone().unwrap_or_default();
        declare(&prefix, ns, &mut start, &mut scope);
    }

    for (key, value) in &elem.attributes {
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if elem.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for child in &elem.children {
        match child {
            XMLNode::Element(e) => write_element(writer, e, &scope)?,
            XMLNode::Text(t) => writer.write_event(Event::Text(BytesText::new(t)))?,
            XMLNode::CData(t) => {
                writer.write_event(Event::CData(quick_xml::events::BytesCData::new(t.as_str())))?
            }
            XMLNode::Comment(_) | XMLNode::ProcessingInstruction(..) => {}
        }
    }
    writer.write_event(Event::End(BytesEnd::new(qualified.as_str())))?;
    Ok(())
}

/// Texte d'un élément, espaces de bord retirés ; `None` si vide.
pub(crate) fn element_text(elem: &Element) -> Option<String> {
    elem.get_text()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Texte de l'enfant `name` de `elem`.
pub(crate) fn child_text(elem: &Element, name: &str) -> Option<String> {
    elem.get_child(name).and_then(element_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::payload_element;

    const DEVICE_NS: &str = "http://www.onvif.org/ver10/device/wsdl";

    #[test]
    fn test_encode_decode_action() {
        let payload = payload_element(DEVICE_NS, "tds", "GetHostname", &[]);
        let bytes = encode(&payload, None).unwrap();
        let xml = String::from_utf8(bytes.clone()).unwrap();

        assert!(xml.contains("<s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\">"));
        assert!(xml.contains("<tds:GetHostname xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\"/>"));
        assert!(!xml.contains("Header"));

        let envelope = decode(&bytes).unwrap();
        assert!(envelope.security.is_none());
        match envelope.body {
            Body::Action(elem) => {
                assert_eq!(elem.name, "GetHostname");
                assert_eq!(elem.namespace.as_deref(), Some(DEVICE_NS));
            }
            Body::Fault(f) => panic!("unexpected fault {f}"),
        }
    }

    #[test]
    fn test_encode_requires_namespace() {
        let payload = Element::new("GetHostname");
        assert!(matches!(
            encode(&payload, None),
            Err(EnvelopeError::MissingNamespace(name)) if name == "GetHostname"
        ));
    }

    #[test]
    fn test_decode_fault() {
        let fault = SoapFault::sender("InvalidArgs").with_detail("bad token");
        let bytes = encode_fault(&fault).unwrap();

        let envelope = decode(&bytes).unwrap();
        match envelope.body {
            Body::Fault(decoded) => assert_eq!(decoded, fault),
            Body::Action(_) => panic!("expected a fault"),
        }
    }

    #[test]
    fn test_decode_soap11_envelope() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:Play xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">
      <InstanceID>0</InstanceID>
    </u:Play>
  </s:Body>
</s:Envelope>"#;
        let envelope = decode(xml.as_bytes()).unwrap();
        assert_eq!(envelope.action_name(), "Play");
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode(b"<s:Envelope><s:Body>"),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            decode(br#"<s:Envelope xmlns:s="x"><s:Body/></s:Envelope>"#),
            Err(EnvelopeError::NoAction)
        ));
        assert!(matches!(
            decode(br#"<s:Envelope xmlns:s="x"></s:Envelope>"#),
            Err(EnvelopeError::NoAction)
        ));
        assert!(matches!(
            decode(b"<Other/>"),
            Err(EnvelopeError::MissingEnvelope)
        ));
    }

    #[test]
    fn test_extract_action_name() {
        let xml = br#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Header><wsse:Security xmlns:wsse="x"><Body/></wsse:Security></s:Header>
  <s:Body>
    <trt:GetStreamUri xmlns:trt="http://www.onvif.org/ver10/media/wsdl">
      <trt:ProfileToken>profile_1</trt:ProfileToken>
    </trt:GetStreamUri>
  </s:Body>
</s:Envelope>"#;
        assert_eq!(extract_action_name(xml).unwrap(), "GetStreamUri");
    }

    #[test]
    fn test_extract_ignores_malformed_fields() {
        // Les champs de l'action ne sont jamais lus
        let xml = br#"<s:Envelope xmlns:s="x"><s:Body><tds:SystemReboot xmlns:tds="y"><broken attr=></s:Body>"#;
        assert_eq!(extract_action_name(xml).unwrap(), "SystemReboot");
    }

    #[test]
    fn test_extract_empty_body() {
        assert!(matches!(
            extract_action_name(br#"<s:Envelope xmlns:s="x"><s:Body></s:Body></s:Envelope>"#),
            Err(EnvelopeError::NoAction)
        ));
        assert!(matches!(
            extract_action_name(br#"<s:Envelope xmlns:s="x"><s:Body/></s:Envelope>"#),
            Err(EnvelopeError::NoAction)
        ));
        assert!(matches!(
            extract_action_name(br#"<s:Envelope xmlns:s="x"></s:Envelope>"#),
            Err(EnvelopeError::NoAction)
        ));
    }

    #[test]
    fn test_extract_malformed() {
        assert!(matches!(
            extract_action_name(b"<s:Envelope><s:Header></s:Body>"),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_text_is_escaped() {
        let payload = payload_element(
            DEVICE_NS,
            "tds",
            "SetHostname",
            &[("Name", "cam <1> & \"co\"")],
        );
        let bytes = encode(&payload, None).unwrap();
        let envelope = decode(&bytes).unwrap();
        match envelope.body {
            Body::Action(elem) => {
                assert_eq!(child_text(&elem, "Name").unwrap(), "cam <1> & \"co\"");
            }
            Body::Fault(_) => panic!("expected an action"),
        }
    }
}
