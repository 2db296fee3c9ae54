//! Resource monitoring and the resource signal bus
//!
//! Samples process memory, CPU, disk, rolling token usage, and active
//! thought counts once per second, compares them against the configured
//! budget, and emits signals on the bus when thresholds are crossed.
//! Signal emission respects a per-resource cooldown so a sustained breach
//! does not flood handlers.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use sqlx::SqlitePool;
use sysinfo::{Disks, System};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use meridian_core::schemas::{ResourceAction, ResourceBudget, ResourceLimit, ResourceSnapshot};
use meridian_core::time::TimeService;

use crate::db::repositories::ThoughtRepository;

/// Async handler invoked with `(signal, resource_name)`.
pub type SignalHandler = Arc<
    dyn Fn(String, String) -> Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

/// Simple subscribe/emit bus for resource signals.
#[derive(Default)]
pub struct ResourceSignalBus {
    handlers: RwLock<HashMap<String, Vec<SignalHandler>>>,
}

impl ResourceSignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one signal name
    /// (`warn|throttle|defer|reject|shutdown`).
    pub fn register(&self, signal: &str, handler: SignalHandler) {
        self.handlers
            .write()
            .entry(signal.to_string())
            .or_default()
            .push(handler);
    }

    /// Invoke every handler registered for the signal. Handler errors are
    /// contained; one failing handler never blocks the rest.
    pub async fn emit(&self, signal: &str, resource: &str) {
        let handlers: Vec<SignalHandler> = self
            .handlers
            .read()
            .get(signal)
            .map(|v| v.to_vec())
            .unwrap_or_default();
        for handler in handlers {
            let fut = handler(signal.to_string(), resource.to_string());
            if let Err(e) = tokio::spawn(fut).await {
                tracing::error!(signal, resource, error = %e, "signal handler panicked");
            }
        }
    }
}

/// Threshold evaluation outcome for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdBreach {
    Warning { resource: String },
    Critical { resource: String, action: ResourceAction },
}

/// Compare a snapshot against the budget. Pure so tests can drive it with
/// synthetic values.
pub fn evaluate_budget(
    budget: &ResourceBudget,
    snapshot: &mut ResourceSnapshot,
) -> Vec<ThresholdBreach> {
    snapshot.warnings.clear();
    snapshot.critical.clear();
    snapshot.healthy = true;

    let checks: [(&str, u64, &ResourceLimit); 5] = [
        ("memory_mb", snapshot.memory_mb, &budget.memory_mb),
        ("cpu_percent", snapshot.cpu_average_1m, &budget.cpu_percent),
        ("tokens_hour", snapshot.tokens_used_hour, &budget.tokens_hour),
        ("tokens_day", snapshot.tokens_used_day, &budget.tokens_day),
        (
            "thoughts_active",
            snapshot.thoughts_active,
            &budget.thoughts_active,
        ),
    ];

    let mut breaches = Vec::new();
    for (name, value, limit) in checks {
        if value >= limit.critical {
            snapshot
                .critical
                .push(format!("{name}: {value}/{}", limit.limit));
            breaches.push(ThresholdBreach::Critical {
                resource: name.to_string(),
                action: limit.action,
            });
        } else if value >= limit.warning {
            snapshot
                .warnings
                .push(format!("{name}: {value}/{}", limit.limit));
            breaches.push(ThresholdBreach::Warning {
                resource: name.to_string(),
            });
        }
    }
    if !snapshot.critical.is_empty() {
        snapshot.healthy = false;
    }
    breaches
}

/// Monitors system resources and enforces the configured budget.
pub struct ResourceMonitor {
    budget: ResourceBudget,
    db_path: PathBuf,
    pool: SqlitePool,
    time: Arc<dyn TimeService>,
    signal_bus: Arc<ResourceSignalBus>,
    snapshot: RwLock<ResourceSnapshot>,
    token_history: AsyncMutex<VecDeque<(DateTime<Utc>, u64)>>,
    cpu_history: AsyncMutex<VecDeque<u64>>,
    last_action: AsyncMutex<HashMap<String, DateTime<Utc>>>,
    system: AsyncMutex<System>,
    stop: watch::Sender<bool>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ResourceMonitor {
    pub fn new(
        budget: ResourceBudget,
        db_path: PathBuf,
        pool: SqlitePool,
        time: Arc<dyn TimeService>,
        signal_bus: Arc<ResourceSignalBus>,
    ) -> Arc<Self> {
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            budget,
            db_path,
            pool,
            time,
            signal_bus,
            snapshot: RwLock::new(ResourceSnapshot {
                healthy: true,
                ..Default::default()
            }),
            token_history: AsyncMutex::new(VecDeque::new()),
            cpu_history: AsyncMutex::new(VecDeque::with_capacity(60)),
            last_action: AsyncMutex::new(HashMap::new()),
            system: AsyncMutex::new(System::new()),
            stop,
            worker: parking_lot::Mutex::new(None),
        })
    }

    pub fn signal_bus(&self) -> Arc<ResourceSignalBus> {
        self.signal_bus.clone()
    }

    /// Last-sampled snapshot.
    pub fn snapshot(&self) -> ResourceSnapshot {
        self.snapshot.read().clone()
    }

    /// Start the 1 Hz sampling loop.
    pub fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let mut stop_rx = self.stop.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!("resource monitor started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = monitor.sample_once().await {
                            tracing::error!(error = %e, "resource monitor sample failed");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::info!("resource monitor stopped");
        });
        *self.worker.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        let _ = self.stop.send(true);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Record tokens consumed against the rolling windows.
    pub async fn record_tokens(&self, tokens: u64) {
        let mut history = self.token_history.lock().await;
        history.push_back((self.time.now(), tokens));
        // Entries older than a day no longer influence any window.
        let cutoff = self.time.now() - ChronoDuration::days(1);
        while matches!(history.front(), Some((ts, _)) if *ts < cutoff) {
            history.pop_front();
        }
    }

    /// Fast pre-admission check against the warning threshold, so callers
    /// back off before hitting a hard limit.
    pub async fn check_available(&self, resource: &str, amount: u64) -> bool {
        let snapshot = self.snapshot();
        let limit = match resource {
            "memory_mb" => &self.budget.memory_mb,
            "cpu_percent" => &self.budget.cpu_percent,
            "tokens_hour" => &self.budget.tokens_hour,
            "tokens_day" => &self.budget.tokens_day,
            "thoughts_active" => &self.budget.thoughts_active,
            _ => return true,
        };
        match snapshot.value_of(resource) {
            Some(value) => value + amount < limit.warning,
            None => true,
        }
    }

    /// One sampling pass: refresh the snapshot, evaluate thresholds, emit
    /// signals with cooldown.
    pub async fn sample_once(&self) -> crate::Result<()> {
        let mut snapshot = self.build_snapshot().await?;
        let breaches = evaluate_budget(&self.budget, &mut snapshot);
        *self.snapshot.write() = snapshot;
        self.emit_breaches(breaches).await;
        Ok(())
    }

    async fn build_snapshot(&self) -> crate::Result<ResourceSnapshot> {
        let mut snapshot = ResourceSnapshot {
            healthy: true,
            ..Default::default()
        };

        {
            let mut system = self.system.lock().await;
            if let Ok(pid) = sysinfo::get_current_pid() {
                system.refresh_process(pid);
                if let Some(process) = system.process(pid) {
                    snapshot.memory_mb = process.memory() / 1024 / 1024;
                    snapshot.cpu_percent = process.cpu_usage().round() as u64;
                }
            }
        }
        if self.budget.memory_mb.limit > 0 {
            snapshot.memory_percent =
                snapshot.memory_mb * 100 / self.budget.memory_mb.limit;
        }

        {
            let mut cpu_history = self.cpu_history.lock().await;
            if cpu_history.len() == 60 {
                cpu_history.pop_front();
            }
            cpu_history.push_back(snapshot.cpu_percent);
            snapshot.cpu_average_1m =
                cpu_history.iter().sum::<u64>() / cpu_history.len().max(1) as u64;
        }

        let disks = Disks::new_with_refreshed_list();
        let db_path = self.db_path.as_path();
        for disk in disks.list() {
            if db_path.starts_with(disk.mount_point()) {
                snapshot.disk_free_mb = disk.available_space() / 1024 / 1024;
                snapshot.disk_used_mb =
                    (disk.total_space() - disk.available_space()) / 1024 / 1024;
            }
        }

        {
            let history = self.token_history.lock().await;
            let now = self.time.now();
            let hour_ago = now - ChronoDuration::hours(1);
            let day_ago = now - ChronoDuration::days(1);
            snapshot.tokens_used_hour = history
                .iter()
                .filter(|(ts, _)| *ts > hour_ago)
                .map(|(_, n)| n)
                .sum();
            snapshot.tokens_used_day = history
                .iter()
                .filter(|(ts, _)| *ts > day_ago)
                .map(|(_, n)| n)
                .sum();
        }

        snapshot.thoughts_active = ThoughtRepository::count_active(&self.pool)
            .await
            .unwrap_or(0) as u64;

        Ok(snapshot)
    }

    async fn emit_breaches(&self, breaches: Vec<ThresholdBreach>) {
        for breach in breaches {
            match breach {
                ThresholdBreach::Warning { resource } => {
                    if self.cooldown_elapsed(&resource, "warning").await {
                        tracing::warn!(resource, "resource warning threshold crossed");
                        self.signal_bus.emit("warn", &resource).await;
                    }
                }
                ThresholdBreach::Critical { resource, action } => {
                    if self.cooldown_elapsed(&resource, "critical").await {
                        tracing::warn!(
                            resource,
                            action = ?action,
                            "resource critical threshold crossed"
                        );
                        if let Some(signal) = action.signal() {
                            self.signal_bus.emit(signal, &resource).await;
                        }
                    }
                }
            }
        }
    }

    async fn cooldown_elapsed(&self, resource: &str, level: &str) -> bool {
        let cooldown = match resource {
            "memory_mb" => self.budget.memory_mb.cooldown_seconds,
            "cpu_percent" => self.budget.cpu_percent.cooldown_seconds,
            "tokens_hour" => self.budget.tokens_hour.cooldown_seconds,
            "tokens_day" => self.budget.tokens_day.cooldown_seconds,
            "thoughts_active" => self.budget.thoughts_active.cooldown_seconds,
            _ => 60,
        };
        let key = format!("{resource}_{level}");
        let now = self.time.now();
        let mut last_action = self.last_action.lock().await;
        if let Some(last) = last_action.get(&key) {
            if now - *last < ChronoDuration::seconds(cooldown as i64) {
                return false;
            }
        }
        last_action.insert(key, now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::init_main_schema;
    use meridian_core::time::ManualTimeService;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn budget() -> ResourceBudget {
        let mut budget = ResourceBudget::default();
        budget.tokens_hour = ResourceLimit::new(100, 200, 300, ResourceAction::Defer);
        budget.tokens_hour.cooldown_seconds = 60;
        budget
    }

    #[test]
    fn test_evaluate_budget_levels() {
        let budget = budget();
        let mut snapshot = ResourceSnapshot {
            tokens_used_hour: 150,
            ..Default::default()
        };
        let breaches = evaluate_budget(&budget, &mut snapshot);
        assert!(breaches.contains(&ThresholdBreach::Warning {
            resource: "tokens_hour".to_string()
        }));
        assert!(snapshot.healthy);
        assert_eq!(snapshot.warnings.len(), 1);

        snapshot.tokens_used_hour = 250;
        let breaches = evaluate_budget(&budget, &mut snapshot);
        assert!(breaches.contains(&ThresholdBreach::Critical {
            resource: "tokens_hour".to_string(),
            action: ResourceAction::Defer
        }));
        assert!(!snapshot.healthy);
    }

    #[test]
    fn test_exact_warning_boundary_emits() {
        let budget = budget();
        let mut snapshot = ResourceSnapshot {
            tokens_used_hour: 100,
            ..Default::default()
        };
        let breaches = evaluate_budget(&budget, &mut snapshot);
        assert_eq!(
            breaches,
            vec![ThresholdBreach::Warning {
                resource: "tokens_hour".to_string()
            }]
        );
    }

    async fn monitor_with_time(
        time: Arc<ManualTimeService>,
    ) -> (Arc<ResourceMonitor>, Arc<AtomicUsize>) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        init_main_schema(&pool).await.unwrap();
        let bus = Arc::new(ResourceSignalBus::new());
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let counter = counter.clone();
            bus.register(
                "defer",
                Arc::new(move |_signal, _resource| {
                    let counter = counter.clone();
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            );
        }
        let monitor = ResourceMonitor::new(
            budget(),
            PathBuf::from("."),
            pool,
            time,
            bus,
        );
        (monitor, counter)
    }

    #[tokio::test]
    async fn test_critical_emits_configured_action_with_cooldown() {
        let time = Arc::new(ManualTimeService::new());
        let (monitor, counter) = monitor_with_time(time.clone()).await;

        monitor.record_tokens(250).await;
        monitor.sample_once().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Within cooldown: suppressed.
        monitor.sample_once().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // After cooldown: emitted again.
        time.advance_secs(61);
        monitor.sample_once().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_check_available_uses_warning_threshold() {
        let time = Arc::new(ManualTimeService::new());
        let (monitor, _) = monitor_with_time(time).await;

        monitor.record_tokens(90).await;
        monitor.sample_once().await.unwrap();
        assert!(monitor.check_available("tokens_hour", 5).await);
        assert!(!monitor.check_available("tokens_hour", 20).await);
        assert!(monitor.check_available("unknown_resource", 1).await);
    }

    #[tokio::test]
    async fn test_token_window_rolls_off() {
        let time = Arc::new(ManualTimeService::new());
        let (monitor, _) = monitor_with_time(time.clone()).await;

        monitor.record_tokens(150).await;
        monitor.sample_once().await.unwrap();
        assert_eq!(monitor.snapshot().tokens_used_hour, 150);

        time.advance_secs(3700);
        monitor.sample_once().await.unwrap();
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.tokens_used_hour, 0);
        assert_eq!(snapshot.tokens_used_day, 150);
    }

    #[tokio::test]
    async fn test_handler_errors_contained() {
        let bus = ResourceSignalBus::new();
        bus.register(
            "warn",
            Arc::new(|_s, _r| {
                Box::pin(async {
                    panic!("handler exploded");
                })
            }),
        );
        // Must not propagate the panic.
        bus.emit("warn", "memory_mb").await;
    }
}
