use crate::{
    backend::Backends,
    call::CallContext,
    config::Config,
    event::{CallEventReceiver, CallEventSender},
    queue::WorkerPool,
    router::{EventRouter, RouterStats},
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub struct AppStateInner {
    pub config: Arc<Config>,
    pub context: Arc<CallContext>,
    pub sender: CallEventSender,
    pub stats: Arc<RouterStats>,
    pub token: CancellationToken,
    pub started_at: DateTime<Utc>,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

pub struct AppStateBuilder {
    pub config: Option<Config>,
    pub backends: Option<Backends>,
    pub token: Option<CancellationToken>,
}

/// A built application: the shared state plus the receiving end of the
/// event channel, consumed by [`App::run`].
pub struct App {
    pub state: AppState,
    pub receiver: CallEventReceiver,
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            backends: None,
            token: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides the backends built from the configuration.
    pub fn backends(mut self, backends: Backends) -> Self {
        self.backends = Some(backends);
        self
    }

    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn build(self) -> Result<App> {
        let config = Arc::new(self.config.unwrap_or_default());
        let backends = match self.backends {
            Some(backends) => backends,
            None => Backends::from_config(&config.backend)?,
        };
        let unknown = config.templates.unknown_sections();
        if !unknown.is_empty() {
            warn!(sections = ?unknown, "template sections not used by any call transition");
        }

        let context = Arc::new(CallContext {
            templates: Arc::new(config.templates.clone()),
            tickets: backends.tickets,
            users: backends.users,
            user_map: config.user_map.clone(),
            pool: WorkerPool::new(config.max_workers),
        });
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();

        let state = Arc::new(AppStateInner {
            config,
            context,
            sender,
            stats: Arc::new(RouterStats::default()),
            token: self.token.unwrap_or_default(),
            started_at: Utc::now(),
        });
        Ok(App { state, receiver })
    }
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    /// Serves the HTTP ingress and the event dispatch loop until the token
    /// is cancelled, then waits for the call queues to drain.
    pub async fn run(self) -> Result<()> {
        let App { state, receiver } = self;
        let token = state.token.clone();

        let addr: SocketAddr = state
            .config
            .http_addr
            .parse()
            .map_err(|e| anyhow!("invalid http_addr {}: {}", state.config.http_addr, e))?;
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind to {}: {}", addr, e);
                return Err(anyhow!("Failed to bind to {}: {}", addr, e));
            }
        };
        info!(%addr, workers = state.context.pool.size(), "astminer listening");

        let app = crate::handler::router()
            .with_state(state.clone())
            .layer(TraceLayer::new_for_http());
        let shutdown = token.clone();
        let http_task = async {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            // stop the dispatch loop as well if the server exits on its own
            token.cancel();
            result
        };
        let router = EventRouter::with_stats(state.context.clone(), state.stats.clone());
        let (http_result, ()) = tokio::join!(http_task, router.serve(receiver, token.clone()));

        let timeout = Duration::from_secs(state.config.shutdown_timeout_secs);
        if state.context.pool.shutdown(timeout).await {
            info!("all call queues drained");
        }

        match http_result {
            Ok(()) => {
                info!("Server shut down gracefully");
                Ok(())
            }
            Err(e) => {
                error!("Server error: {}", e);
                Err(anyhow!("Server error: {}", e))
            }
        }
    }
}
