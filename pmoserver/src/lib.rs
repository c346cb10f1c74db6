//! # pmoserver - Hôte HTTP pour endpoints SOAP
//!
//! Cette crate monte des [`pmosoap::SoapEndpoint`] derrière un serveur Axum
//! et initialise les logs à partir de la configuration.
//!
//! - [`server`] : serveur, builder et montage des endpoints
//! - [`logs`] : subscriber `tracing` global et réglage du niveau à chaud
//! - [`config_ext`] : clés `server.*` de pmoconfig
//!
//! ## Exemple
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pmoconfig::get_config;
//! use pmoserver::logs::{LoggingOptions, init_logging};
//! use pmoserver::{ServerBuilder, ServerConfigExt};
//! use pmosoap::{Action, SoapServer, payload_element};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = get_config();
//!     let _logs = init_logging(LoggingOptions::from_config(&config));
//!
//!     let device = SoapServer::builder()
//!         .handler(Action::GetHostname, |req| {
//!             Ok(req.respond_fields(&[("Name", "camera")]))
//!         })
//!         .build();
//!
//!     let mut server = ServerBuilder::new_configured("mock-camera").build();
//!     server
//!         .add_endpoint(&config.get_server_control_path()?, Arc::new(device))
//!         .await;
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod config_ext;
pub mod logs;
pub mod server;

pub use config_ext::ServerConfigExt;
pub use logs::{LogHandle, LoggingOptions, init_logging};
pub use server::{Server, ServerBuilder, ServerInfo};
