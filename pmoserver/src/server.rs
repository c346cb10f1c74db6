//! # Module Server - Hôte HTTP pour endpoints SOAP
//!
//! Expose n'importe quel [`SoapEndpoint`] (un [`pmosoap::SoapServer`], un
//! matcher de rejeu...) derrière Axum. Les endpoints sont synchrones : chaque
//! requête est traitée dans `spawn_blocking` pour ne pas bloquer le runtime.
//!
//! - 🎯 **Endpoints SOAP** : `add_endpoint()` monte un endpoint sur un chemin
//! - 🔀 **Routes Axum** : `add_router()` pour tout le reste
//! - ⚡ **Arrêt gracieux** : `stop()` ou Ctrl+C

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use pmoconfig::get_config;
use pmosoap::envelope::FALLBACK_FAULT;
use pmosoap::{SOAP_CONTENT_TYPE, SoapEndpoint};
use serde::Serialize;
use tokio::sync::{RwLock, oneshot};
use tokio::{signal, task::JoinHandle};
use tracing::{error, info, warn};

use crate::config_ext::ServerConfigExt;

/// Info serveur sérialisable
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub base_url: String,
    pub http_port: u16,
    pub endpoints: Vec<String>,
}

/// Serveur principal
pub struct Server {
    name: String,
    base_url: String,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    endpoints: Vec<String>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl Server {
    /// Crée une nouvelle instance de serveur
    ///
    /// # Arguments
    ///
    /// * `name` - Nom du serveur (pour les logs)
    /// * `base_url` - URL de base (ex: "http://localhost")
    /// * `http_port` - Port HTTP à écouter, 0 pour un port éphémère
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            endpoints: Vec::new(),
            local_addr: None,
            shutdown: None,
            join_handle: None,
        }
    }

    /// Serveur dont le port provient de `server.http_port`
    pub fn new_configured(name: impl Into<String>) -> Self {
        ServerBuilder::new_configured(name).build()
    }

    /// Monte un endpoint SOAP sur `path`, toutes méthodes confondues.
    ///
    /// La méthode est transmise à l'endpoint, qui décide du refus (405).
    pub async fn add_endpoint(&mut self, path: &str, endpoint: Arc<dyn SoapEndpoint>) {
        let route = Router::new()
            .route(path, any(soap_handler))
            .with_state(endpoint);

        let mut r = self.router.write().await;
        *r = std::mem::take(&mut *r).merge(route);
        self.endpoints.push(path.to_string());
        info!("🎯 SOAP endpoint mounted on {}", path);
    }

    /// Ajoute un router Axum arbitraire (fusionné à la racine ou imbriqué)
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        let mut r = self.router.write().await;
        *r = if path.is_empty() || path == "/" {
            std::mem::take(&mut *r).merge(sub_router)
        } else {
            std::mem::take(&mut *r).nest(path, sub_router)
        };
    }

    /// Démarre le serveur et retourne l'adresse effectivement liée.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        self.http_port = local_addr.port();
        self.local_addr = Some(local_addr);

        info!(
            "Server {} running at {}:{}",
            self.name, self.base_url, self.http_port
        );

        let router = self.router.read().await.clone();
        let (tx, rx) = oneshot::channel::<()>();
        self.shutdown = Some(tx);

        let shutdown = async move {
            tokio::select! {
                _ = rx => {},
                _ = signal::ctrl_c() => info!("Ctrl+C reçu, arrêt gracieux"),
            }
        };

        let name = self.name.clone();
        self.join_handle = Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Server {} stopped with error: {}", name, e);
            }
        }));

        Ok(local_addr)
    }

    /// Attend la fin du serveur
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }

    /// Demande l'arrêt gracieux puis attend la fin du serveur
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.wait().await;
        info!("Server {} stopped", self.name);
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            http_port: self.http_port,
            endpoints: self.endpoints.clone(),
        }
    }
}

async fn soap_handler(
    State(endpoint): State<Arc<dyn SoapEndpoint>>,
    method: Method,
    body: Bytes,
) -> Response {
    let method = method.as_str().to_string();
    let result = tokio::task::spawn_blocking(move || endpoint.respond(&method, &body)).await;

    match result {
        Ok(response) => {
            let status = StatusCode::from_u16(response.status).unwrap_or_else(|_| {
                warn!("Invalid status {} from endpoint", response.status);
                StatusCode::INTERNAL_SERVER_ERROR
            });
            (status, [(header::CONTENT_TYPE, SOAP_CONTENT_TYPE)], response.body).into_response()
        }
        Err(e) => {
            error!("❌ SOAP endpoint task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, SOAP_CONTENT_TYPE)],
                FALLBACK_FAULT,
            )
                .into_response()
        }
    }
}

/// Builder de [`Server`]
pub struct ServerBuilder {
    name: String,
    base_url: String,
    http_port: u16,
}

impl ServerBuilder {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, http_port: u16) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            http_port,
        }
    }

    pub fn new_configured(name: impl Into<String>) -> Self {
        let port = get_config().get_server_http_port().unwrap_or(8080);
        Self::new(name, "http://localhost", port)
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build(self) -> Server {
        Server::new(self.name, self.base_url, self.http_port)
    }
}
