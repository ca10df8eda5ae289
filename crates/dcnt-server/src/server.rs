//! `RelayServer`: axum WebSocket gateway with one listener per address.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::serve::Listener as _;
use axum::Router;
use dcnt_core::{CloseReason, LoopbackHeuristic};
use dcnt_relay::{AuthorizationGate, RelayOptions, SignalRouter};
use dcnt_settings::RelaySettings;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::listener::{self, PeerAddr};
use crate::shutdown::ShutdownCoordinator;
use crate::tls::TlsAcceptor;
use crate::websocket::session::run_session;

/// Result of starting one address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new listener is bound here.
    Started(SocketAddr),
    /// A listener for this address was already running; nothing changed.
    AlreadyListening(SocketAddr),
}

impl StartOutcome {
    /// Bound socket address.
    pub fn addr(&self) -> SocketAddr {
        match self {
            Self::Started(addr) | Self::AlreadyListening(addr) => *addr,
        }
    }
}

/// Result of stopping one address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// The listener bound here was stopped.
    Stopped(SocketAddr),
    /// No listener was running for this address.
    NotListening(String),
}

struct ActiveListener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
    serve_task: JoinHandle<()>,
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The relay aggregate.
    pub router: Arc<SignalRouter>,
    /// Authorization grace timer.
    pub gate: AuthorizationGate,
    /// Listener and session settings.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server was created.
    pub start_time: Instant,
    listeners: Arc<Mutex<BTreeMap<IpAddr, ActiveListener>>>,
}

/// The relay server.
pub struct RelayServer {
    state: AppState,
    tls: Option<TlsAcceptor>,
}

impl RelayServer {
    /// Create a server. Listeners are plaintext when `tls` is `None`.
    pub fn new(
        config: ServerConfig,
        router: SignalRouter,
        gate: AuthorizationGate,
        tls: Option<TlsAcceptor>,
    ) -> Self {
        Self {
            state: AppState {
                router: Arc::new(router),
                gate,
                config: Arc::new(config),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                start_time: Instant::now(),
                listeners: Arc::new(Mutex::new(BTreeMap::new())),
            },
            tls,
        }
    }

    /// Build a server from loaded settings, loading certificates if set.
    pub fn from_settings(settings: &RelaySettings) -> Result<Self, ServerError> {
        let tls = settings
            .tls
            .paths()
            .map(|(cert, key)| TlsAcceptor::from_pem_files(cert, key))
            .transpose()?;
        let router = SignalRouter::new(RelayOptions {
            purge_remote_on_local_disconnect: settings.relay.purge_remote_on_local_disconnect,
        })
        .with_classifier(Arc::new(LoopbackHeuristic::new(
            settings.relay.local_hosts.iter().cloned(),
        )));
        Ok(Self::new(
            ServerConfig::from(&settings.server),
            router,
            AuthorizationGate::new(settings.relay.auth_grace()),
            tls,
        ))
    }

    /// Build the axum router with all routes.
    pub fn app(&self) -> Router {
        build_router(self.state.clone())
    }

    /// The relay aggregate.
    pub fn router(&self) -> &Arc<SignalRouter> {
        &self.state.router
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Whether listeners use TLS.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Start one listener per address on the configured port.
    ///
    /// Addresses that already have a listener are reported as
    /// [`StartOutcome::AlreadyListening`]. On a bind failure the error is
    /// returned; listeners started earlier in the same call stay up.
    /// Shutdown is terminal: after [`Self::shutdown_gracefully`] this
    /// returns [`ServerError::ShutDown`].
    pub async fn start(&self, addresses: &[String]) -> Result<Vec<StartOutcome>, ServerError> {
        if self.state.shutdown.is_shutting_down() {
            return Err(ServerError::ShutDown);
        }
        if addresses.is_empty() {
            return Err(ServerError::NoAddresses);
        }
        let ips = addresses
            .iter()
            .map(|a| parse_ip(a))
            .collect::<Result<Vec<_>, _>>()?;

        let mut listeners = self.state.listeners.lock().await;
        let mut outcomes = Vec::with_capacity(ips.len());
        for ip in ips {
            if let Some(active) = listeners.get(&ip) {
                info!(addr = %active.local_addr, "already listening");
                outcomes.push(StartOutcome::AlreadyListening(active.local_addr));
                continue;
            }

            let addr = SocketAddr::new(ip, self.state.config.port);
            let cancel = self.state.shutdown.child_token();
            let (listener, accept_task) = listener::bind(
                addr,
                self.tls.clone(),
                self.state.config.handshake_timeout(),
                cancel.clone(),
            )
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
            let local_addr = listener
                .local_addr()
                .map_err(|source| ServerError::Bind { addr, source })?;

            let app = self
                .app()
                .into_make_service_with_connect_info::<PeerAddr>();
            let signal = cancel.clone();
            let serve_task = tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app)
                    .with_graceful_shutdown(signal.cancelled_owned())
                    .await
                {
                    warn!(addr = %local_addr, error = %e, "listener failed");
                }
            });

            info!(addr = %local_addr, tls = self.tls.is_some(), "listening");
            let _ = listeners.insert(
                ip,
                ActiveListener {
                    local_addr,
                    cancel,
                    accept_task,
                    serve_task,
                },
            );
            outcomes.push(StartOutcome::Started(local_addr));
        }
        Ok(outcomes)
    }

    /// Stop the listeners for `addresses`; an empty list stops all.
    ///
    /// Sessions already established on a stopped listener stay connected.
    pub async fn stop(&self, addresses: &[String]) -> Vec<StopOutcome> {
        let mut listeners = self.state.listeners.lock().await;
        let targets: Vec<(String, Option<ActiveListener>)> = if addresses.is_empty() {
            std::mem::take(&mut *listeners)
                .into_iter()
                .map(|(ip, active)| (ip.to_string(), Some(active)))
                .collect()
        } else {
            addresses
                .iter()
                .map(|a| {
                    let active = parse_ip(a).ok().and_then(|ip| listeners.remove(&ip));
                    (a.clone(), active)
                })
                .collect()
        };
        drop(listeners);

        let mut outcomes = Vec::with_capacity(targets.len());
        for (requested, active) in targets {
            let Some(active) = active else {
                info!(addr = %requested, "not listening");
                outcomes.push(StopOutcome::NotListening(requested));
                continue;
            };
            active.cancel.cancel();
            if let Err(e) = active.accept_task.await {
                warn!(addr = %active.local_addr, error = %e, "accept task failed");
            }
            info!(addr = %active.local_addr, "stopped listening");
            outcomes.push(StopOutcome::Stopped(active.local_addr));
        }
        outcomes
    }

    /// Whether any listener is active.
    pub async fn is_running(&self) -> bool {
        !self.state.listeners.lock().await.is_empty()
    }

    /// Bound addresses of the active listeners.
    pub async fn listening_addresses(&self) -> Vec<SocketAddr> {
        self.state
            .listeners
            .lock()
            .await
            .values()
            .map(|active| active.local_addr)
            .collect()
    }

    /// Stop every listener, close live sessions with "Going away" and wait
    /// up to `timeout` for the listener tasks to drain. The server cannot be
    /// started again afterwards.
    pub async fn shutdown_gracefully(&self, timeout: Option<Duration>) {
        self.state.shutdown.shutdown();
        let listeners = std::mem::take(&mut *self.state.listeners.lock().await);
        let closed = self.state.router.close_all(CloseReason::GoingAway);
        info!(
            listeners = listeners.len(),
            sessions = closed,
            "shutting down"
        );

        let handles = listeners
            .into_values()
            .flat_map(|active| [active.accept_task, active.serve_task])
            .collect();
        self.state.shutdown.graceful_shutdown(handles, timeout).await;
    }
}

fn parse_ip(address: &str) -> Result<IpAddr, ServerError> {
    address
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .map_err(|_| ServerError::InvalidAddress(address.to_owned()))
}

/// Build the axum router: WebSocket upgrade on `/` and `/ws`, `/health`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(PeerAddr(peer)): ConnectInfo<PeerAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_session(socket, peer, state))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let listeners = state.listeners.lock().await.len();
    Json(health::health_check(
        state.start_time,
        state.router.stats(),
        listeners,
        state.shutdown.is_shutting_down(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn make_server() -> RelayServer {
        RelayServer::new(
            ServerConfig::default(),
            SignalRouter::new(RelayOptions::default()),
            AuthorizationGate::default(),
            None,
        )
    }

    fn loopback() -> Vec<String> {
        vec!["127.0.0.1".to_owned()]
    }

    #[tokio::test]
    async fn health_endpoint_returns_counters() {
        let server = make_server();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = server.app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["local_sessions"], 0);
        assert_eq!(parsed["listeners"], 0);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = server.app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn start_requires_addresses() {
        let server = make_server();
        let err = server.start(&[]).await.unwrap_err();
        assert!(matches!(err, ServerError::NoAddresses));
        assert!(!server.is_running().await);
    }

    #[tokio::test]
    async fn start_rejects_non_ip_addresses() {
        let server = make_server();
        let err = server.start(&["localhost".to_owned()]).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidAddress(ref a) if a == "localhost"));
    }

    #[tokio::test]
    async fn start_twice_is_a_no_op() {
        let server = make_server();
        let first = server.start(&loopback()).await.unwrap();
        let [StartOutcome::Started(addr)] = first.as_slice() else {
            panic!("expected a new listener, got {first:?}");
        };
        let addr = *addr;
        assert_ne!(addr.port(), 0);

        let second = server.start(&loopback()).await.unwrap();
        assert_eq!(second, vec![StartOutcome::AlreadyListening(addr)]);
        assert_eq!(server.listening_addresses().await, vec![addr]);

        let _ = server.stop(&[]).await;
    }

    #[tokio::test]
    async fn stop_without_listener_is_a_no_op() {
        let server = make_server();
        let outcomes = server.stop(&loopback()).await;
        assert_eq!(outcomes, vec![StopOutcome::NotListening("127.0.0.1".to_owned())]);
        assert!(server.stop(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn stop_then_restart() {
        let server = make_server();
        let started = server.start(&loopback()).await.unwrap();
        assert!(server.is_running().await);

        let stopped = server.stop(&loopback()).await;
        assert_eq!(stopped, vec![StopOutcome::Stopped(started[0].addr())]);
        assert!(!server.is_running().await);

        let restarted = server.start(&loopback()).await.unwrap();
        assert!(matches!(restarted[0], StartOutcome::Started(_)));
        let _ = server.stop(&[]).await;
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let server = make_server();
        let _ = server.start(&loopback()).await.unwrap();
        server
            .shutdown_gracefully(Some(Duration::from_secs(2)))
            .await;
        assert!(!server.is_running().await);
        assert!(server.shutdown().is_shutting_down());
    }

    #[tokio::test]
    async fn start_after_shutdown_is_refused() {
        let server = make_server();
        server.shutdown_gracefully(Some(Duration::from_secs(1))).await;

        let err = server.start(&loopback()).await.unwrap_err();
        assert!(matches!(err, ServerError::ShutDown));
        assert!(!server.is_running().await);
        assert!(server.listening_addresses().await.is_empty());
    }

    #[test]
    fn from_settings_without_tls() {
        let mut settings = RelaySettings::default();
        settings.relay.purge_remote_on_local_disconnect = false;
        let server = RelayServer::from_settings(&settings).unwrap();
        assert!(!server.is_tls());
        assert!(!server.router().options().purge_remote_on_local_disconnect);
        assert_eq!(server.config().port, 4200);
    }

    #[test]
    fn from_settings_with_missing_certificate() {
        let mut settings = RelaySettings::default();
        settings.tls.cert_path = Some("/nonexistent/cert.pem".into());
        settings.tls.key_path = Some("/nonexistent/key.pem".into());
        let err = RelayServer::from_settings(&settings).err().unwrap();
        assert!(matches!(err, ServerError::Tls(_)));
    }

    #[test]
    fn parse_ip_accepts_bracketed_v6() {
        assert_eq!(parse_ip("[::1]").unwrap(), "::1".parse::<IpAddr>().unwrap());
        assert_eq!(parse_ip(" 127.0.0.1 ").unwrap(), "127.0.0.1".parse::<IpAddr>().unwrap());
    }
}
