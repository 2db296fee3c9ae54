//! Top-level runtime composition
//!
//! Owns initialization order and shutdown. Services come up leaves-first:
//! time, configuration, databases, registry, memory provider, secrets,
//! audit (fatal on signing failure), identity (fatal when missing or
//! corrupt), resource monitor, buses, sinks, and finally the processor.
//! Resource signals are wired so `defer` pauses intake and defers pending
//! work while `shutdown` requests the state transition.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use meridian_core::registry::ProviderRegistration;
use meridian_core::schemas::{AgentState, AuditEventData, ResourceBudget};
use meridian_core::time::{SystemTimeService, TimeService};
use meridian_core::{BusManager, MemoryBus, ServiceRegistry, ServicePriority};

use crate::audit::{AuditService, AuditServiceParams, ExportFormat};
use crate::config::EssentialConfig;
use crate::correlations::SqlCorrelationStore;
use crate::db::{schema, DatabaseConnection};
use crate::filter::HeuristicFilter;
use crate::identity::IdentityManager;
use crate::memory::LocalGraphMemory;
use crate::observer::{Observer, ObserverConfig};
use crate::processor::{
    ActionSelector, EchoSelector, Processor, ProcessorConfig, StateManager,
};
use crate::rate_limit::RateLimiter;
use crate::resource::{ResourceMonitor, ResourceSignalBus};
use crate::secrets::SecretsStore;
use crate::sinks::{ActionSink, DeferralSink, FeedbackSink};
use crate::{Result, RuntimeError};

const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;
const SINK_QUEUE_SIZE: usize = 1000;
const DEFERRAL_QUEUE_SIZE: usize = 500;
const AUDIT_CACHE_SIZE: usize = 1000;

/// Fully wired agent runtime.
pub struct Runtime {
    pub config: EssentialConfig,
    pub time: Arc<dyn TimeService>,
    pub registry: Arc<ServiceRegistry>,
    pub buses: Arc<BusManager>,
    pub audit: Arc<AuditService>,
    pub identity: Arc<IdentityManager>,
    pub resource: Arc<ResourceMonitor>,
    pub processor: Arc<Processor>,
    pub action_sink: Arc<ActionSink>,
    pub deferral_sink: Arc<DeferralSink>,
    pub feedback_sink: Arc<FeedbackSink>,
    pub rate_limiter: Arc<RateLimiter>,

    main_db: DatabaseConnection,
    secrets_db: DatabaseConnection,
    audit_db: DatabaseConnection,
    handles: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    /// Build the runtime with the default action selector and system clock.
    pub async fn initialize(config: EssentialConfig) -> Result<Arc<Self>> {
        Self::initialize_with(
            config,
            Arc::new(SystemTimeService::new()),
            Arc::new(EchoSelector),
        )
        .await
    }

    /// Build the runtime with explicit collaborators (tests inject a manual
    /// clock and a scripted selector).
    pub async fn initialize_with(
        config: EssentialConfig,
        time: Arc<dyn TimeService>,
        selector: Arc<dyn ActionSelector>,
    ) -> Result<Arc<Self>> {
        // Databases.
        let main_db = DatabaseConnection::open_file(&config.database.main_db).await?;
        schema::init_main_schema(main_db.pool()).await?;
        let secrets_db = DatabaseConnection::open_file(&config.database.secrets_db).await?;
        schema::init_secrets_schema(secrets_db.pool()).await?;
        let audit_db = DatabaseConnection::open_file(&config.database.audit_db).await?;
        schema::init_audit_schema(audit_db.pool()).await?;

        // Registry and correlation store.
        let registry = Arc::new(ServiceRegistry::new(time.clone()));
        let correlations = Arc::new(SqlCorrelationStore::new(
            main_db.pool().clone(),
            time.clone(),
        ));

        // Local graph memory provider, registered for the memory kind.
        let memory = Arc::new(LocalGraphMemory::new(main_db.pool().clone(), time.clone()));
        registry.memory.register(
            ProviderRegistration::new("local_graph_memory", memory.clone() as _)
                .with_priority(ServicePriority::Normal)
                .with_capabilities(["memorize", "recall", "forget", "search"]),
        );

        // Secrets pipeline. A missing master key is fatal; secrets handling
        // is not optional.
        let master_key = std::env::var(&config.security.secrets_encryption_key_env)
            .map_err(|_| {
                RuntimeError::Config(format!(
                    "secrets master key env var '{}' is not set",
                    config.security.secrets_encryption_key_env
                ))
            })?;
        let secrets = Arc::new(SecretsStore::new(
            secrets_db.pool().clone(),
            &master_key,
            time.clone(),
        )?);
        registry.secrets.register(
            ProviderRegistration::new("local_secrets", secrets.clone() as _)
                .with_priority(ServicePriority::Normal),
        );

        // Default adaptive filter.
        registry.adaptive_filter.register(
            ProviderRegistration::new(
                "heuristic_filter",
                Arc::new(HeuristicFilter::new("meridian")) as _,
            )
            .with_priority(ServicePriority::Fallback),
        );

        // Audit service over its own memory bus (no audit sink: audit
        // storage must not audit itself).
        let audit_memory_bus = Arc::new(MemoryBus::new(
            registry.clone(),
            correlations.clone(),
            time.clone(),
        ));
        let audit = AuditService::init(AuditServiceParams {
            memory_bus: audit_memory_bus,
            time: time.clone(),
            chain_pool: config
                .security
                .enable_signed_audit
                .then(|| audit_db.pool().clone()),
            key_path: config.security.audit_key_path.clone(),
            export_path: None,
            export_format: ExportFormat::Jsonl,
            retention_days: config.security.audit_retention_days,
            cache_size: AUDIT_CACHE_SIZE,
        })
        .await?;

        // Buses for everything else, auditing through the audit service.
        let buses = Arc::new(BusManager::new(
            registry.clone(),
            correlations,
            Some(audit.clone() as _),
            time.clone(),
        ));

        // Identity: refuse startup when missing or corrupt.
        let identity = Arc::new(IdentityManager::new(
            memory.clone() as _,
            time.clone(),
            config.template_directory.clone(),
            config.default_template.clone(),
        ));
        identity.initialize_identity().await?;

        // Resource monitor and signal bus.
        let signal_bus = Arc::new(ResourceSignalBus::new());
        let resource = ResourceMonitor::new(
            ResourceBudget::default(),
            config.database.main_db.clone(),
            main_db.pool().clone(),
            time.clone(),
            signal_bus.clone(),
        );

        // Sinks.
        let action_sink = ActionSink::new(
            SINK_QUEUE_SIZE,
            buses.communication.clone(),
            buses.tool.clone(),
        );
        let deferral_sink = DeferralSink::new(
            DEFERRAL_QUEUE_SIZE,
            buses.wise_authority.clone(),
            buses.communication.clone(),
            None,
        );
        let feedback_sink = FeedbackSink::new(
            DEFERRAL_QUEUE_SIZE,
            main_db.pool().clone(),
            time.clone(),
            audit.clone() as _,
        );

        // State machine and processor. The runtime boots in SHUTDOWN; start
        // performs the SHUTDOWN -> WAKEUP transition.
        let state = Arc::new(AsyncMutex::new(StateManager::new(
            time.clone(),
            AgentState::Shutdown,
        )));
        let processor = Processor::new(
            main_db.pool().clone(),
            time.clone(),
            state,
            selector,
            buses.memory.clone(),
            action_sink.clone(),
            deferral_sink.clone(),
            audit.clone(),
            Some(resource.clone()),
            Some(identity.clone()),
            ProcessorConfig::from_essential(&config),
        );

        // Resource signals drive the processor.
        {
            let processor_for_defer = processor.clone();
            signal_bus.register(
                "defer",
                Arc::new(move |_signal, resource| {
                    let processor = processor_for_defer.clone();
                    Box::pin(async move {
                        tracing::warn!(resource, "defer signal: pausing and deferring work");
                        processor.pause();
                        if let Err(e) = processor.defer_pending_work("resource_defer").await {
                            tracing::error!(error = %e, "failed to defer pending work");
                        }
                    })
                }),
            );
            let processor_for_shutdown = processor.clone();
            signal_bus.register(
                "shutdown",
                Arc::new(move |_signal, resource| {
                    let processor = processor_for_shutdown.clone();
                    Box::pin(async move {
                        tracing::warn!(resource, "shutdown signal: requesting state transition");
                        processor.request_shutdown_transition().await;
                    })
                }),
            );
        }

        let rate_limiter = Arc::new(RateLimiter::new(
            DEFAULT_REQUESTS_PER_MINUTE,
            vec!["/system/health".to_string()],
            time.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            time,
            registry,
            buses,
            audit,
            identity,
            resource,
            processor,
            action_sink,
            deferral_sink,
            feedback_sink,
            rate_limiter,
            main_db,
            secrets_db,
            audit_db,
            handles: AsyncMutex::new(Vec::new()),
        }))
    }

    /// Pool of the main database (tasks, thoughts, correlations, graph).
    pub fn main_pool(&self) -> &sqlx::SqlitePool {
        self.main_db.pool()
    }

    /// Build an observer wired into this runtime.
    pub fn create_observer(&self, config: ObserverConfig) -> Result<Arc<Observer>> {
        let secrets = self
            .registry
            .secrets
            .select(None, &[])
            .map(|s| s.instance)
            .ok_or_else(|| {
                RuntimeError::Config("no secrets provider registered".to_string())
            })?;
        Ok(Arc::new(Observer::new(
            config,
            self.registry.clone(),
            secrets,
            self.buses.memory.clone(),
            self.audit.clone() as _,
            self.feedback_sink.clone(),
            self.main_db.pool().clone(),
            self.time.clone(),
        )))
    }

    /// Start background work and enter WAKEUP.
    pub async fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        handles.push(self.action_sink.spawn());
        handles.push(self.deferral_sink.spawn());
        handles.push(self.feedback_sink.spawn());
        self.resource.start();
        self.audit.start();

        {
            let state_manager = self.processor.state_manager();
            let mut state = state_manager.lock().await;
            if !state.transition_to(AgentState::Wakeup) {
                return Err(RuntimeError::Config(
                    "runtime cannot enter wakeup from its current state".to_string(),
                ));
            }
        }
        handles.push(self.processor.spawn());

        // Janitor for idle rate-limit buckets.
        {
            let limiter = self.rate_limiter.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(std::time::Duration::from_secs(300));
                loop {
                    ticker.tick().await;
                    let evicted = limiter.evict_idle();
                    if evicted > 0 {
                        tracing::debug!(evicted, "evicted idle rate-limit buckets");
                    }
                }
            }));
        }

        let _ = self
            .audit
            .log_event(
                "runtime_started",
                AuditEventData::new("runtime", "system")
                    .with_action("start")
                    .with_resource("runtime"),
            )
            .await;
        tracing::info!("runtime started");
        Ok(())
    }

    /// Orderly shutdown: state machine first, then signals, sinks, workers,
    /// the audit trail, and finally the databases.
    pub async fn shutdown(&self) {
        tracing::info!("runtime shutdown requested");

        self.processor.request_shutdown_transition().await;
        self.resource.signal_bus().emit("shutdown", "runtime").await;
        self.processor.request_stop();
        if let Err(e) = self.processor.defer_pending_work("shutdown").await {
            tracing::warn!(error = %e, "failed to defer remaining work during shutdown");
        }

        self.action_sink.stop().await;
        self.deferral_sink.stop().await;
        self.feedback_sink.stop().await;
        self.resource.stop().await;

        let handles = {
            let mut guard = self.handles.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }

        // Logs the final shutdown event, flushes exports, closes chain db.
        self.audit.stop().await;

        self.main_db.close().await;
        self.secrets_db.close().await;
        self.audit_db.close().await;
        tracing::info!("runtime stopped");
    }
}
