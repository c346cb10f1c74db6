//! SOAP Faults
//!
//! Un fault occupe le `Body` à la place de la réponse d'une action.
//! Le format émis est celui de SOAP 1.2 (`Code/Value`, `Code/Subcode/Value`,
//! `Reason/Text`, `Detail/Text`) ; le décodage accepte aussi la forme SOAP 1.1
//! (`faultcode`, `faultstring`, `detail`).

use std::fmt;
use xmltree::{Element, XMLNode};

use crate::envelope::{SOAP_PREFIX, child_text, element_text};

/// Code de fault SOAP 1.2.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FaultCode {
    /// Le message de l'appelant est en cause
    Sender,
    /// Le traitement a échoué côté serveur
    Receiver,
    VersionMismatch,
    MustUnderstand,
    DataEncodingUnknown,
    /// Code non standard, conservé tel quel (préfixe compris)
    Other(String),
}

impl FaultCode {
    pub fn as_str(&self) -> &str {
        match self {
            FaultCode::Sender => "Sender",
            FaultCode::Receiver => "Receiver",
            FaultCode::VersionMismatch => "VersionMismatch",
            FaultCode::MustUnderstand => "MustUnderstand",
            FaultCode::DataEncodingUnknown => "DataEncodingUnknown",
            FaultCode::Other(code) => code,
        }
    }

    /// Analyse un code. Le préfixe est ignoré pour les codes standard et
    /// conservé pour [`FaultCode::Other`].
    ///
    /// Les codes SOAP 1.1 `Client` et `Server` sont ramenés à `Sender` et `Receiver`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match strip_prefix(raw) {
            "Sender" | "Client" => FaultCode::Sender,
            "Receiver" | "Server" => FaultCode::Receiver,
            "VersionMismatch" => FaultCode::VersionMismatch,
            "MustUnderstand" => FaultCode::MustUnderstand,
            "DataEncodingUnknown" => FaultCode::DataEncodingUnknown,
            _ => FaultCode::Other(raw.to_string()),
        }
    }

    /// Statut HTTP associé par le binding SOAP 1.2.
    pub fn http_status(&self) -> u16 {
        match self {
            FaultCode::Sender => 400,
            _ => 500,
        }
    }

    /// Valeur qualifiée émise dans `Code/Value`
    fn qualified(&self) -> String {
        match self {
            FaultCode::Other(raw) => raw.clone(),
            standard => format!("{}:{}", SOAP_PREFIX, standard.as_str()),
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Erreur SOAP (Fault)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    pub code: FaultCode,

    /// Sous-code qualifié (ex: "ter:InvalidArgVal")
    pub subcode: Option<String>,

    /// Raison lisible
    pub reason: String,

    /// Détail optionnel (message du handler, par exemple)
    pub detail: Option<String>,
}

impl SoapFault {
    pub fn new(code: FaultCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            subcode: None,
            reason: reason.into(),
            detail: None,
        }
    }

    pub fn sender(reason: impl Into<String>) -> Self {
        Self::new(FaultCode::Sender, reason)
    }

    pub fn receiver(reason: impl Into<String>) -> Self {
        Self::new(FaultCode::Receiver, reason)
    }

    pub fn with_subcode(mut self, subcode: impl Into<String>) -> Self {
        self.subcode = Some(subcode.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Statut HTTP à utiliser pour transporter ce fault.
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Construit l'élément `s:Fault`.
    pub(crate) fn to_element(&self) -> Element {
        let mut fault = soap_element("Fault");

        let mut code = soap_element("Code");
        code.children.push(XMLNode::Element(text_element(
            "Value",
            &self.code.qualified(),
        )));
        if let Some(subcode) = &self.subcode {
            let mut sub = soap_element("Subcode");
            sub.children
                .push(XMLNode::Element(text_element("Value", subcode)));
            code.children.push(XMLNode::Element(sub));
        }
        fault.children.push(XMLNode::Element(code));

        let mut reason = soap_element("Reason");
        let mut text = text_element("Text", &self.reason);
        text.attributes
            .insert("xml:lang".to_string(), "en".to_string());
        reason.children.push(XMLNode::Element(text));
        fault.children.push(XMLNode::Element(reason));

        if let Some(detail_text) = &self.detail {
            let mut detail = soap_element("Detail");
            detail
                .children
                .push(XMLNode::Element(text_element("Text", detail_text)));
            fault.children.push(XMLNode::Element(detail));
        }

        fault
    }

    /// Lit un élément `Fault` (SOAP 1.2 ou 1.1).
    pub(crate) fn from_element(fault: &Element) -> Self {
        if let Some(code) = fault.get_child("Code") {
            let value = child_text(code, "Value").unwrap_or_default();
            let subcode = code
                .get_child("Subcode")
                .and_then(|s| child_text(s, "Value"));
            let reason = fault
                .get_child("Reason")
                .and_then(|r| child_text(r, "Text").or_else(|| element_text(r)))
                .unwrap_or_default();
            let detail = fault
                .get_child("Detail")
                .and_then(|d| child_text(d, "Text").or_else(|| element_text(d)));

            return Self {
                code: FaultCode::parse(&value),
                subcode,
                reason,
                detail,
            };
        }

        // SOAP 1.1
        Self {
            code: FaultCode::parse(&child_text(fault, "faultcode").unwrap_or_default()),
            subcode: None,
            reason: child_text(fault, "faultstring").unwrap_or_default(),
            detail: fault.get_child("detail").and_then(element_text),
        }
    }
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if let Some(subcode) = &self.subcode {
            write!(f, "/{}", subcode)?;
        }
        write!(f, ": {}", self.reason)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

/// Sous-codes ONVIF usuels (namespace `ter`)
pub mod subcodes {
    pub const INVALID_ARG_VAL: &str = "ter:InvalidArgVal";
    pub const ACTION_NOT_SUPPORTED: &str = "ter:ActionNotSupported";
    pub const NOT_AUTHORIZED: &str = "ter:NotAuthorized";
    pub const WELL_FORMED: &str = "ter:WellFormed";
    pub const ACTION: &str = "ter:Action";
}

fn strip_prefix(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

fn soap_element(name: &str) -> Element {
    let mut elem = Element::new(name);
    elem.prefix = Some(SOAP_PREFIX.to_string());
    elem
}

fn text_element(name: &str, text: &str) -> Element {
    let mut elem = soap_element(name);
    elem.children.push(XMLNode::Text(text.to_string()));
    elem
}
