//! The chain orchestrator.
//!
//! Assembles the middleware chain in its fixed order, owns the sync hub
//! and the session registry, runs the periodic cleanup task, and supports
//! hot reconfiguration: each layer reapplies its own config snapshot, then
//! the chain is rebuilt. In-flight requests keep the chain they entered
//! with.

use std::sync::Arc;
use std::time::Duration;

use hermes_core::{
    HermesConfig, HermesResult, RequestContext, ShutdownSignal, TaskTracker,
};
use hermes_middleware::{
    AuthStage, Authenticator, Chain, RecoveryStage, Request, Responder, Response, ShaperStage,
    ValidationStage,
};
use hermes_session::{BackendClient, SessionRegistry, SessionStage};
use hermes_sync::{SyncHub, SyncStage};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::router::Router;

/// Owns every layer of the control plane and their lifecycles.
pub struct Orchestrator {
    config: RwLock<HermesConfig>,
    chain: RwLock<Arc<Chain>>,
    pub(crate) router: Router,

    pub(crate) responder: Arc<Responder>,
    recovery: Arc<RecoveryStage>,
    shaper: Arc<ShaperStage>,
    auth_stage: Arc<AuthStage>,
    pub(crate) authenticator: Arc<Authenticator>,
    validation: Arc<ValidationStage>,
    sync_stage: Arc<SyncStage>,
    hub: Arc<SyncHub>,
    session_stage: Arc<SessionStage>,
    pub(crate) sessions: Arc<SessionRegistry>,
    backend: Arc<BackendClient>,

    shutdown: ShutdownSignal,
    tasks: TaskTracker,
}

impl Orchestrator {
    /// Builds the orchestrator from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the configuration is inconsistent.
    pub fn new(config: HermesConfig) -> HermesResult<Arc<Self>> {
        config.validate()?;

        let responder = Arc::new(Responder::new(config.shaper.clone()));
        let recovery = Arc::new(RecoveryStage::new(
            config.recovery.clone(),
            Arc::clone(&responder),
        ));
        let shaper = Arc::new(ShaperStage::new(Arc::clone(&responder)));
        let authenticator = Arc::new(Authenticator::new(config.auth.clone()));
        let auth_stage = Arc::new(AuthStage::new(Arc::clone(&authenticator)));
        let validation = Arc::new(ValidationStage::new(config.validation.clone()));

        let hub = SyncHub::new(config.sync.clone());
        let sync_stage = Arc::new(SyncStage::new(Arc::clone(&hub)));

        let sessions = Arc::new(SessionRegistry::new());
        let backend = Arc::new(BackendClient::new(config.session.clone()));
        let session_stage = Arc::new(SessionStage::new(
            Arc::clone(&sessions),
            Arc::clone(&backend),
            Arc::clone(&responder),
        ));

        let chain = Arc::new(Self::build_chain(
            &recovery,
            &shaper,
            &auth_stage,
            &validation,
            &sync_stage,
            &session_stage,
        ));

        Ok(Arc::new(Self {
            config: RwLock::new(config),
            chain: RwLock::new(chain),
            router: Router::control_plane(),
            responder,
            recovery,
            shaper,
            auth_stage,
            authenticator,
            validation,
            sync_stage,
            hub,
            session_stage,
            sessions,
            backend,
            shutdown: ShutdownSignal::new(),
            tasks: TaskTracker::new(),
        }))
    }

    fn build_chain(
        recovery: &Arc<RecoveryStage>,
        shaper: &Arc<ShaperStage>,
        auth: &Arc<AuthStage>,
        validation: &Arc<ValidationStage>,
        sync: &Arc<SyncStage>,
        session: &Arc<SessionStage>,
    ) -> Chain {
        Chain::builder()
            .stage(Arc::clone(recovery) as Arc<dyn hermes_middleware::Middleware>)
            .stage(Arc::clone(shaper) as Arc<dyn hermes_middleware::Middleware>)
            .stage(Arc::clone(auth) as Arc<dyn hermes_middleware::Middleware>)
            .stage(Arc::clone(validation) as Arc<dyn hermes_middleware::Middleware>)
            .stage(Arc::clone(sync) as Arc<dyn hermes_middleware::Middleware>)
            .stage(Arc::clone(session) as Arc<dyn hermes_middleware::Middleware>)
            .build()
    }

    /// Spawns the hub's loops and the periodic cleanup task.
    pub fn start(self: &Arc<Self>) {
        self.hub.start();

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let _token = orchestrator.tasks.acquire();
            orchestrator.run_cleanup().await;
        });

        info!("orchestrator started");
    }

    /// Stops everything: signals shutdown, closes the hub (draining
    /// outbound queues best-effort), and waits for background tasks up to
    /// the deadline.
    pub async fn stop(&self, deadline: Duration) {
        info!("orchestrator stopping");
        self.shutdown.trigger();
        self.hub.stop(deadline).await;

        if tokio::time::timeout(deadline, self.tasks.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!("cleanup task still running at shutdown deadline");
        }
        info!("orchestrator stopped");
    }

    /// Processes one buffered request through the chain.
    pub async fn handle(self: &Arc<Self>, ctx: &mut RequestContext, request: Request) -> Response {
        let chain = Arc::clone(&self.chain.read());
        let orchestrator = Arc::clone(self);

        chain
            .handle(ctx, request, move |ctx, request| {
                let snapshot = ctx.clone();
                Box::pin(async move { orchestrator.dispatch(snapshot, request).await })
            })
            .await
    }

    /// Applies a new configuration: validates it, lets each layer reapply
    /// its own section, then rebuilds the chain.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the new configuration is
    /// inconsistent; the old configuration stays in effect.
    pub fn reconfigure(&self, config: HermesConfig) -> HermesResult<()> {
        config.validate()?;

        self.recovery.configure(config.recovery.clone());
        self.responder.configure(config.shaper.clone());
        self.authenticator.configure(config.auth.clone());
        self.validation.configure(config.validation.clone());
        self.hub.configure(config.sync.clone());
        self.backend.configure(config.session.clone());

        let chain = Arc::new(Self::build_chain(
            &self.recovery,
            &self.shaper,
            &self.auth_stage,
            &self.validation,
            &self.sync_stage,
            &self.session_stage,
        ));
        *self.chain.write() = chain;
        *self.config.write() = config;

        info!("configuration updated");
        Ok(())
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> HermesConfig {
        self.config.read().clone()
    }

    /// Returns the per-component status map.
    #[must_use]
    pub fn status(&self) -> serde_json::Value {
        let config = self.config.read().clone();
        serde_json::json!({
            "timestamp": chrono::Utc::now(),
            "recovery": { "name": "recovery", "enabled": config.recovery.enabled },
            "shaper": { "name": "shaper", "enabled": config.shaper.enabled },
            "auth": { "name": "auth", "enabled": config.auth.enabled },
            "validation": { "name": "validation", "enabled": config.validation.enabled },
            "sync": {
                "name": "sync",
                "enabled": config.sync.enabled,
                "client_count": self.hub.client_count(),
            },
            "session": {
                "name": "session",
                "enabled": config.session.enabled,
                "session_count": self.sessions.count(),
            },
        })
    }

    /// Returns the active chain's stage names, outermost first.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.chain.read().stage_names()
    }

    /// Returns the shared sync hub.
    #[must_use]
    pub fn hub(&self) -> Arc<SyncHub> {
        Arc::clone(&self.hub)
    }

    /// Returns the shared session registry.
    #[must_use]
    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.sessions)
    }

    /// Returns the shared authenticator.
    #[must_use]
    pub fn authenticator(&self) -> Arc<Authenticator> {
        Arc::clone(&self.authenticator)
    }

    /// Evicts idle sessions and logs component statistics on a fixed
    /// period until shutdown.
    async fn run_cleanup(&self) {
        loop {
            let (interval, idle_timeout) = {
                let config = self.config.read();
                (
                    config.session.gc_interval(),
                    config.session.idle_timeout(),
                )
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let evicted = self.sessions.evict_idle(idle_timeout);
                    debug!(
                        evicted,
                        sync_clients = self.hub.client_count(),
                        sessions = self.sessions.count(),
                        "periodic cleanup",
                    );
                }
                _ = self.shutdown.recv() => break,
            }
        }
        debug!("cleanup task stopped");
    }
}
