//! # pmosoap - Moteur SOAP avec authentification WS-Security
//!
//! Ce crate fournit le cœur protocolaire utilisé pour piloter des caméras
//! ONVIF et pour les simuler :
//!
//! - **Enveloppes** : encodage, décodage, extraction du nom d'action ([`envelope`])
//! - **Faults** : codes SOAP 1.2, sous-codes, détail ([`fault`])
//! - **Sécurité** : UsernameToken PasswordDigest, génération et vérification ([`security`])
//! - **Client** : appel d'action sur un [`Transport`] quelconque ([`client`])
//! - **Serveur** : routage par action vers des handlers enregistrés ([`server`])
//!
//! ## Exemple
//!
//! ```
//! use pmosoap::{
//!     Action, CallContext, Credentials, LocalTransport, SoapClient, SoapServer, payload_element,
//! };
//!
//! let creds = Credentials::new("admin", "password123");
//! let server = SoapServer::builder()
//!     .credentials(creds.clone())
//!     .handler(Action::GetHostname, |req| Ok(req.respond_fields(&[("Name", "cam-01")])))
//!     .build();
//!
//! let client = SoapClient::with_transport(LocalTransport::new(server)).with_credentials(creds);
//! let request = payload_element(Action::GetHostname.service().unwrap().namespace(), "tds", "GetHostname", &[]);
//! let response = client.invoke("local", &request, &CallContext::new()).unwrap();
//! assert_eq!(response.name, "GetHostnameResponse");
//! ```

pub mod action;
pub mod client;
pub mod config_ext;
pub mod endpoint;
pub mod envelope;
pub mod fault;
pub mod payload;
pub mod security;
pub mod server;
pub mod transport;

pub use action::{Action, Service, SoapRequest};
pub use client::{ErrorKind, SoapClient, SoapError};
pub use config_ext::SoapConfigExt;
pub use endpoint::{EndpointResponse, SoapEndpoint};
pub use envelope::{
    Body, Envelope, EnvelopeError, SOAP_CONTENT_TYPE, SOAP_ENV_NS, decode, encode, encode_fault,
    extract_action_name,
};
pub use fault::{FaultCode, SoapFault};
pub use payload::{PayloadError, from_payload, payload_element, to_payload};
pub use security::{AuthError, Credentials, ReplayGuard, SecurityHeader};
pub use server::{
    ActionHandler, ActionRequest, HandlerError, HandlerRegistry, SoapServer, SoapServerBuilder,
};
pub use transport::{
    CallContext, CancelToken, Canceller, HttpTransport, LocalTransport, Transport, TransportError,
    TransportResponse,
};

// Réexport pour les handlers et les mappings par opération
pub use xmltree::Element;
