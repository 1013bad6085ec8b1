//! Proxy lifecycle: `created → starting → running → stopping → stopped`.
//!
//! [`PaywalledProxy::start`] refuses to serve until the channel manager has
//! synchronized, so no request is gated against stale channel state. The
//! server runs on a spawned task; [`stop`](PaywalledProxy::stop) waits a
//! bounded time for that task to come up before shutting it down, which
//! makes stop-right-after-start safe.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::dev::ServerHandle;
use actix_web::middleware::{Condition, Logger};
use actix_web::{web, App, HttpServer};
use mps::{ChannelDirectory, ChannelManager};
use tokio::task::JoinHandle;

use crate::config::ProxyConfig;
use crate::content::{ContentRegistry, PaywalledContent};
use crate::cors::build_cors;
use crate::error::ProxyError;
use crate::metrics::register_metrics;
use crate::routes::{self, RouteTable};
use crate::state::AppState;

/// Request bodies above this are rejected.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Bounded readiness polling used while stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl StopPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// Poll `ready` up to `attempts` times, sleeping `backoff` between polls.
    /// Returns whether it ever reported ready.
    pub async fn wait_until<F: FnMut() -> bool>(&self, mut ready: F) -> bool {
        for attempt in 1..=self.attempts {
            if ready() {
                return true;
            }
            tracing::debug!(attempt, attempts = self.attempts, "server not started yet");
            tokio::time::sleep(self.backoff).await;
        }
        ready()
    }
}

struct ServerTask {
    handle: ServerHandle,
    started: Arc<AtomicBool>,
    task: JoinHandle<std::io::Result<()>>,
    addrs: Vec<SocketAddr>,
}

/// A paywalled HTTP proxy bound to one channel manager.
pub struct PaywalledProxy {
    config: ProxyConfig,
    state: ProxyState,
    app_state: AppState,
    routes: Arc<RouteTable>,
    server: Option<ServerTask>,
}

impl PaywalledProxy {
    /// Starts `manager` and builds the route table. Nothing is bound yet.
    pub fn new(manager: Arc<dyn ChannelManager>, config: ProxyConfig) -> Result<Self, ProxyError> {
        if manager.receiver() != config.receiver_address() {
            return Err(ProxyError::ReceiverMismatch {
                key: config.receiver_address(),
                manager: manager.receiver(),
            });
        }
        manager.start();
        register_metrics();

        let directory = ChannelDirectory::new(manager);
        let app_state = AppState::new(&config, directory, Arc::new(ContentRegistry::new()))?;
        let routes = Arc::new(RouteTable::new(config.static_dir.clone()));

        Ok(Self {
            config,
            state: ProxyState::Created,
            app_state,
            routes,
            server: None,
        })
    }

    pub fn state(&self) -> ProxyState {
        self.state
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn app_state(&self) -> &AppState {
        &self.app_state
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn add_content(&self, content: PaywalledContent) {
        self.app_state.content.add(content);
    }

    /// Addresses the server is bound to, once started.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.server
            .as_ref()
            .map(|s| s.addrs.clone())
            .unwrap_or_default()
    }

    fn transition(&mut self, from: &[ProxyState], to: ProxyState) -> Result<(), ProxyError> {
        if !from.contains(&self.state) {
            return Err(ProxyError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!(from = ?self.state, to = ?to, "proxy state change");
        self.state = to;
        Ok(())
    }

    /// Wait for channel sync, bind, and start serving in the background.
    ///
    /// `debug` turns on per-request access logging. Fails with
    /// [`ProxyError::SyncTimeout`] if the manager does not sync within the
    /// configured timeout; the proxy returns to `Created` and may be started
    /// again.
    pub async fn start(&mut self, debug: bool) -> Result<(), ProxyError> {
        self.transition(&[ProxyState::Created], ProxyState::Starting)?;

        tracing::info!(
            timeout = ?self.config.sync_timeout,
            "waiting for channel manager to sync"
        );
        if !self.app_state.directory.wait_sync(self.config.sync_timeout).await {
            tracing::error!("channel manager did not sync in time");
            self.state = ProxyState::Created;
            return Err(ProxyError::SyncTimeout(self.config.sync_timeout));
        }

        let server = match self.bind(debug) {
            Ok(server) => server,
            Err(e) => {
                self.state = ProxyState::Created;
                return Err(e);
            }
        };

        for addr in &server.addrs {
            tracing::info!("mps-proxy listening on http://{}", addr);
        }
        self.server = Some(server);
        self.state = ProxyState::Running;
        Ok(())
    }

    fn bind(&self, debug: bool) -> Result<ServerTask, ProxyError> {
        let state_data = web::Data::new(self.app_state.clone());
        let routes = self.routes.clone();
        let allowed_origins = self.config.allowed_origins.clone();
        let rate_limit_rpm = self.config.rate_limit_rpm;

        let governor_conf = GovernorConfigBuilder::default()
            .requests_per_minute(u64::from(rate_limit_rpm.max(1)))
            .finish()
            .ok_or_else(|| ProxyError::Internal("invalid rate limiter config".to_string()))?;

        let http_server = HttpServer::new(move || {
            App::new()
                .app_data(state_data.clone())
                .app_data(web::PayloadConfig::new(MAX_BODY_SIZE))
                .wrap(Condition::new(debug, Logger::default()))
                .wrap(build_cors(&allowed_origins))
                .wrap(Condition::new(
                    rate_limit_rpm > 0,
                    Governor::new(&governor_conf),
                ))
                .configure(|cfg| routes::configure(cfg, &routes))
        })
        .disable_signals()
        .bind((self.config.host.as_str(), self.config.port))?;

        let addrs = http_server.addrs();
        let server = http_server.run();
        let handle = server.handle();
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();
        let task = actix_web::rt::spawn(async move {
            flag.store(true, Ordering::SeqCst);
            server.await
        });

        Ok(ServerTask {
            handle,
            started,
            task,
            addrs,
        })
    }

    /// Gracefully stop the server and wait for it to exit.
    ///
    /// Stopping an already stopped proxy is a no-op.
    pub async fn stop(&mut self) -> Result<(), ProxyError> {
        if self.state == ProxyState::Stopped {
            return Ok(());
        }
        let Some(server) = self.server.take() else {
            return Err(ProxyError::ServerLifecycle(
                "stop called before the server was started".to_string(),
            ));
        };
        self.transition(&[ProxyState::Running], ProxyState::Stopping)?;

        let started = server.started.clone();
        if !self
            .config
            .stop_policy
            .wait_until(|| started.load(Ordering::SeqCst))
            .await
        {
            tracing::warn!(
                attempts = self.config.stop_policy.attempts,
                "server never reported started, stopping anyway"
            );
        }

        tracing::info!("stopping mps-proxy");
        server.handle.stop(true).await;
        let result = server.task.await;
        self.state = ProxyState::Stopped;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProxyError::Io(e)),
            Err(e) => Err(ProxyError::Internal(format!("server task failed: {e}"))),
        }
    }

    /// Wait until the server exits on its own.
    ///
    /// Cancel-safe: dropping the future leaves the server running, so it can
    /// be raced against a shutdown signal and followed by [`stop`](Self::stop).
    pub async fn join(&mut self) -> Result<(), ProxyError> {
        let server = self.server.as_mut().ok_or_else(|| {
            ProxyError::ServerLifecycle("join called before the server was started".to_string())
        })?;

        let result = (&mut server.task).await;
        self.server = None;
        self.state = ProxyState::Stopped;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProxyError::Io(e)),
            Err(e) => Err(ProxyError::Internal(format!("server task failed: {e}"))),
        }
    }
}
