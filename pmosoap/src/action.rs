//! Actions connues et services qui les portent
//!
//! Le routage côté serveur se fait sur [`Action`] ; un nom absent de la table
//! devient `Action::Unknown` et reste routable si un handler l'enregistre.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Service ONVIF (namespace et préfixe conventionnel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Device,
    Media,
    Ptz,
    Imaging,
    Events,
}

impl Service {
    pub fn namespace(&self) -> &'static str {
        match self {
            Service::Device => "http://www.onvif.org/ver10/device/wsdl",
            Service::Media => "http://www.onvif.org/ver10/media/wsdl",
            Service::Ptz => "http://www.onvif.org/ver20/ptz/wsdl",
            Service::Imaging => "http://www.onvif.org/ver20/imaging/wsdl",
            Service::Events => "http://www.onvif.org/ver10/events/wsdl",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Service::Device => "tds",
            Service::Media => "trt",
            Service::Ptz => "tptz",
            Service::Imaging => "timg",
            Service::Events => "tev",
        }
    }
}

/// Déclare l'enum `Action` et ses conversions depuis une table
/// `Variant => Service`.
macro_rules! define_actions {
    ($($variant:ident => $service:ident),* $(,)?) => {
        /// Nom d'action SOAP
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum Action {
            $($variant,)*
            /// Action hors de la table
            Unknown(String),
        }

        impl Action {
            /// Toutes les actions connues
            pub const KNOWN: &'static [Action] = &[$(Action::$variant,)*];

            pub fn as_str(&self) -> &str {
                match self {
                    $(Action::$variant => stringify!($variant),)*
                    Action::Unknown(name) => name,
                }
            }

            /// Service portant l'action ; `None` pour une action inconnue.
            pub fn service(&self) -> Option<Service> {
                match self {
                    $(Action::$variant => Some(Service::$service),)*
                    Action::Unknown(_) => None,
                }
            }
        }

        impl From<&str> for Action {
            fn from(name: &str) -> Self {
                match name {
                    $(stringify!($variant) => Action::$variant,)*
                    other => Action::Unknown(other.to_string()),
                }
            }
        }
    };
}

define_actions! {
    // Device
    GetDeviceInformation => Device,
    GetCapabilities => Device,
    GetServices => Device,
    GetServiceCapabilities => Device,
    GetSystemDateAndTime => Device,
    SetSystemDateAndTime => Device,
    GetHostname => Device,
    SetHostname => Device,
    GetNetworkInterfaces => Device,
    GetScopes => Device,
    GetUsers => Device,
    SystemReboot => Device,
    // Media
    GetProfiles => Media,
    GetProfile => Media,
    GetVideoSources => Media,
    GetVideoEncoderConfigurations => Media,
    GetStreamUri => Media,
    GetSnapshotUri => Media,
    // PTZ
    GetNodes => Ptz,
    GetConfigurations => Ptz,
    ContinuousMove => Ptz,
    AbsoluteMove => Ptz,
    RelativeMove => Ptz,
    Stop => Ptz,
    GetStatus => Ptz,
    GetPresets => Ptz,
    GotoPreset => Ptz,
    SetPreset => Ptz,
    RemovePreset => Ptz,
    GotoHomePosition => Ptz,
    // Imaging
    GetImagingSettings => Imaging,
    SetImagingSettings => Imaging,
    GetOptions => Imaging,
    // Events
    GetEventProperties => Events,
    CreatePullPointSubscription => Events,
    PullMessages => Events,
}

impl Action {
    /// Réponse conventionnelle : `<Action>Response`
    pub fn response_name(&self) -> String {
        format!("{}Response", self.as_str())
    }
}

impl From<String> for Action {
    fn from(name: String) -> Self {
        Action::from(name.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requête typée fournie par les mappings par opération.
///
/// Le nom de l'élément racine est celui de l'action ; le namespace est celui
/// de son service, sauf surcharge.
pub trait SoapRequest: Serialize {
    /// Réponse attendue
    type Response: DeserializeOwned;

    fn action() -> Action;

    fn namespace() -> &'static str {
        Self::action()
            .service()
            .map(|s| s.namespace())
            .unwrap_or_default()
    }

    fn prefix() -> &'static str {
        Self::action()
            .service()
            .map(|s| s.prefix())
            .unwrap_or("ns")
    }
}
