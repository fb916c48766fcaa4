//! Bouncer Server - Reverse proxy in front of the protected service.
//!
//! Every request passes through the bouncer middleware; admitted requests
//! are relayed to the configured upstream.
//!
//! ## Example
//!
//! ```no_run
//! use bouncer_proxy::BouncerState;
//! use bouncer_server::{Server, ServerConfig};
//!
//! async fn serve(state: BouncerState) -> bouncer_server::Result<()> {
//!     let config = ServerConfig::new("0.0.0.0:8080".parse().unwrap(), "http://127.0.0.1:8081".parse().unwrap());
//!     let handle = Server::new(config, state)?.start().await?;
//!     handle.wait().await;
//!     Ok(())
//! }
//! ```

mod error;
mod forward;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use axum::Router;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};
use url::Url;

use bouncer_core::ServerSettings;
use bouncer_proxy::{bouncer_middleware, BouncerState};

pub use error::{Result, ServerError};
pub use forward::Upstream;

/// Default time allowed for the upstream to answer.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to accept client connections on.
    pub listen: SocketAddr,
    /// Base URL of the protected service.
    pub upstream: Url,
    pub upstream_timeout: Duration,
}

impl ServerConfig {
    pub fn new(listen: SocketAddr, upstream: Url) -> Self {
        Self {
            listen,
            upstream,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    /// Parses the `[server]` section of the configuration file.
    pub fn from_settings(settings: &ServerSettings) -> Result<Self> {
        let listen = settings.listen.parse().map_err(|e| {
            ServerError::InvalidSettings(format!("listen address {}: {}", settings.listen, e))
        })?;
        let upstream = Url::parse(&settings.upstream).map_err(|e| {
            ServerError::InvalidSettings(format!("upstream {}: {}", settings.upstream, e))
        })?;
        if !matches!(upstream.scheme(), "http" | "https") {
            return Err(ServerError::InvalidSettings(format!(
                "upstream {} must be http or https",
                settings.upstream
            )));
        }
        Ok(Self::new(listen, upstream))
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.listen.set_port(port);
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    shutdown_tx: broadcast::Sender<()>,
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the server is actually bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals the server to stop accepting connections.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Waits for the server to finish.
    pub async fn wait(self) {
        let _ = self.handle.await;
    }

    /// Shuts down and waits for in-flight requests to drain.
    pub async fn stop(self) {
        self.shutdown();
        self.wait().await;
    }
}

/// The bouncing reverse proxy server.
pub struct Server {
    router: Router,
    addr: SocketAddr,
}

impl Server {
    /// Creates a server relaying admitted requests to `config.upstream`.
    pub fn new(config: ServerConfig, state: BouncerState) -> Result<Self> {
        let upstream = Upstream::new(config.upstream, config.upstream_timeout)?;
        let router = Router::new()
            .fallback(forward::forward)
            .layer(from_fn_with_state(state, bouncer_middleware))
            .with_state(upstream);

        Ok(Self {
            router,
            addr: config.listen,
        })
    }

    /// Returns the configured listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the router for testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    fn bind(&self) -> Result<TcpListener> {
        let addr = self.addr;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::BindError(addr, e))?;

        // Rebinding right after a restart must not fail on TIME_WAIT sockets.
        socket
            .set_reuse_address(true)
            .map_err(|e| ServerError::BindError(addr, e))?;
        socket
            .bind(&addr.into())
            .map_err(|e| ServerError::BindError(addr, e))?;
        socket
            .listen(1024)
            .map_err(|e| ServerError::BindError(addr, e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| ServerError::BindError(addr, e))?;

        let std_listener: std::net::TcpListener = socket.into();
        TcpListener::from_std(std_listener).map_err(|e| ServerError::BindError(addr, e))
    }

    /// Runs the server until `signal` resolves, then drains connections.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind()?;
        Self::serve(listener, self.router, signal).await
    }

    async fn serve<F>(listener: TcpListener, router: Router, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Runtime(e.to_string()))?;
        info!("Bouncer listening on {}", addr);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| ServerError::Runtime(e.to_string()))
    }

    /// Binds and serves in a background task.
    ///
    /// Binding errors are returned here; the handle reports the bound
    /// address, which differs from the configured one when port 0 is used.
    pub async fn start(self) -> Result<ServerHandle> {
        let listener = self.bind()?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(self.addr, e))?;

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let router = self.router;
        let handle = tokio::spawn(async move {
            let signal = async move {
                let _ = shutdown_rx.recv().await;
                info!("Bouncer server shutting down");
            };
            if let Err(e) = Self::serve(listener, router, signal).await {
                error!("Server error: {}", e);
            }
        });

        Ok(ServerHandle {
            shutdown_tx,
            addr,
            handle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use axum::routing::{any, get};
    use bouncer_core::{FallbackRemediation, Remediation, SyncMode, TrustResolver};
    use bouncer_storage::{DecisionCache, MemoryStore};
    use bouncer_sync::testing::FakeDecisionSource;
    use bouncer_sync::SyncEngine;
    use tower::ServiceExt;

    fn state(mode: SyncMode) -> BouncerState {
        let engine = Arc::new(SyncEngine::new(
            mode,
            Arc::new(FakeDecisionSource::new()),
            DecisionCache::new(Arc::new(MemoryStore::new())),
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let trust = TrustResolver::new(&[] as &[&str], &[], "X-Forwarded-For").unwrap();
        BouncerState::new(trust, engine, None, FallbackRemediation::Ban)
    }

    async fn spawn_upstream() -> SocketAddr {
        let app = Router::new()
            .route("/health", get(|| async { "upstream ok" }))
            .route(
                "/echo",
                any(|request: axum::extract::Request| async move {
                    let method = request.method().to_string();
                    let query = request.uri().query().unwrap_or_default().to_string();
                    let body = axum::body::to_bytes(request.into_body(), usize::MAX)
                        .await
                        .unwrap();
                    format!("{} {} {}", method, query, String::from_utf8_lossy(&body))
                }),
            )
            .fallback(|uri: axum::http::Uri| async move { format!("path {}", uri.path()) });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn config(upstream: SocketAddr) -> ServerConfig {
        ServerConfig::new(
            "127.0.0.1:0".parse().unwrap(),
            Url::parse(&format!("http://{}/", upstream)).unwrap(),
        )
    }

    #[test]
    fn settings_are_parsed() {
        let config = ServerConfig::from_settings(&ServerSettings::default()).unwrap();
        assert_eq!(config.listen.port(), 8080);
        assert_eq!(config.upstream.as_str(), "http://127.0.0.1:8081/");
        assert_eq!(config.upstream_timeout, DEFAULT_UPSTREAM_TIMEOUT);
    }

    #[test]
    fn bad_settings_are_rejected() {
        let settings = ServerSettings {
            listen: "not an address".to_string(),
            ..ServerSettings::default()
        };
        assert!(matches!(
            ServerConfig::from_settings(&settings),
            Err(ServerError::InvalidSettings(_))
        ));

        let settings = ServerSettings {
            upstream: "ftp://127.0.0.1/".to_string(),
            ..ServerSettings::default()
        };
        assert!(matches!(
            ServerConfig::from_settings(&settings),
            Err(ServerError::InvalidSettings(_))
        ));
    }

    #[tokio::test]
    async fn admitted_request_reaches_upstream() {
        let upstream = spawn_upstream().await;
        let server = Server::new(config(upstream), state(SyncMode::Streaming)).unwrap();

        let mut request = Request::builder()
            .method("POST")
            .uri("/echo?page=2")
            .body(Body::from("payload"))
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("203.0.113.20:5000".parse::<SocketAddr>().unwrap()));

        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"POST page=2 payload");
    }

    #[tokio::test]
    async fn absolute_url_path_is_forwarded_to_the_upstream() {
        let upstream = spawn_upstream().await;
        let server = Server::new(config(upstream), state(SyncMode::Streaming)).unwrap();

        let mut request = Request::builder()
            .uri("/http://evil.example/steal")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("203.0.113.23:5000".parse::<SocketAddr>().unwrap()));

        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"path /http://evil.example/steal");
    }

    #[tokio::test]
    async fn banned_client_never_reaches_upstream() {
        let upstream = spawn_upstream().await;
        let state = state(SyncMode::Streaming);
        state
            .engine
            .cache()
            .remember("203.0.113.21", Remediation::Banned, Duration::from_secs(60))
            .await
            .unwrap();
        let server = Server::new(config(upstream), state).unwrap();

        let mut request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("203.0.113.21:5000".parse::<SocketAddr>().unwrap()));

        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        // Bind and drop to get a port nothing listens on.
        let closed = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap();
        let server = Server::new(config(closed), state(SyncMode::Disabled)).unwrap();

        let mut request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo("203.0.113.22:5000".parse::<SocketAddr>().unwrap()));
        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn started_server_serves_and_stops() {
        let upstream = spawn_upstream().await;
        let handle = Server::new(config(upstream), state(SyncMode::Streaming))
            .unwrap()
            .start()
            .await
            .unwrap();
        assert_ne!(handle.addr().port(), 0);

        let body = reqwest::get(format!("http://{}/health", handle.addr()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "upstream ok");

        handle.stop().await;
    }

    #[tokio::test]
    async fn occupied_port_is_a_bind_error() {
        let upstream = spawn_upstream().await;
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        let server = Server::new(
            config(upstream).with_port(port),
            state(SyncMode::Streaming),
        )
        .unwrap();
        assert!(matches!(
            server.start().await,
            Err(ServerError::BindError(_, _))
        ));
    }
}
