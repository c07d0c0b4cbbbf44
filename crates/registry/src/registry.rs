//! The instance registry.
//!
//! Owns the instance map, runs the health monitor, tracks aggregate
//! capacity, and orchestrates discovery.  Emits its closed event catalog
//! over a broadcast channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use pi_domain::breaker::BreakerMap;
use pi_domain::config::{RegistryConfig, RegistryDefaults};
use pi_domain::trace::TraceEvent;
use pi_domain::{Error, Result};

use crate::discovery::DiscoveryStrategy;
use crate::events::RegistryEvent;
use crate::instance::{HealthStatus, Instance, SelectionCriteria, SelectionStrategy};
use crate::selection::{apply_strategy, filter_candidates};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supporting types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Liveness probe against a single instance.  The worker transport lives
/// outside the core; tests plug in doubles.
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, instance: &Instance) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CapacityBreakdown {
    pub instances: usize,
    pub max_concurrent: u32,
    pub active: u32,
    pub available: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapacityReport {
    pub generated_at: DateTime<Utc>,
    pub total_max_concurrent: u32,
    pub total_active: u32,
    pub total_available: u32,
    pub healthy_instances: usize,
    pub by_provider: HashMap<String, CapacityBreakdown>,
    pub by_region: HashMap<String, CapacityBreakdown>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_instances: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    pub total_available: u32,
    pub instances_by_provider: HashMap<String, usize>,
}

#[derive(Default)]
struct CapacityWatermark {
    available: u32,
    healthy: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct InstanceRegistry {
    config: RegistryConfig,
    instances: RwLock<HashMap<String, Instance>>,
    round_robin: AtomicU64,
    events: broadcast::Sender<RegistryEvent>,
    probe: Arc<dyn HealthProbe>,
    strategies: RwLock<Vec<Arc<dyn DiscoveryStrategy>>>,
    discovery_breakers: BreakerMap,
    removal_timers: Mutex<HashMap<String, JoinHandle<()>>>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
    watermark: Mutex<CapacityWatermark>,
}

impl InstanceRegistry {
    pub fn new(config: RegistryConfig, probe: Arc<dyn HealthProbe>) -> Self {
        let (events, _) = broadcast::channel(256);
        let breaker_config = (&config.circuit_breaker).into();
        Self {
            config,
            instances: RwLock::new(HashMap::new()),
            round_robin: AtomicU64::new(0),
            events,
            probe,
            strategies: RwLock::new(Vec::new()),
            discovery_breakers: BreakerMap::new(breaker_config),
            removal_timers: Mutex::new(HashMap::new()),
            monitor_task: Mutex::new(None),
            watermark: Mutex::new(CapacityWatermark::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        let _ = self.events.send(event);
    }

    pub fn register_strategy(&self, strategy: Arc<dyn DiscoveryStrategy>) {
        self.strategies.write().push(strategy);
    }

    // ── Registration ───────────────────────────────────────────────

    /// Register an instance, replacing any prior registration of the same
    /// id (which is announced as `unregistered("replaced")` first).
    pub fn register(&self, mut instance: Instance) {
        instance
            .capacity
            .update(instance.capacity.active_tasks, None);
        let id = instance.id.clone();

        let replaced = {
            let mut instances = self.instances.write();
            let replaced = instances.remove(&id).is_some();
            instances.insert(id.clone(), instance.clone());
            replaced
        };
        if replaced {
            self.emit(RegistryEvent::InstanceUnregistered {
                instance_id: id.clone(),
                reason: "replaced".into(),
            });
        }
        self.cancel_removal(&id);

        tracing::info!(
            instance_id = %id,
            provider = %instance.provider,
            model = %instance.model,
            replaced,
            "instance registered"
        );
        TraceEvent::InstanceRegistered {
            instance_id: id.clone(),
            provider: instance.provider.to_string(),
            replaced,
        }
        .emit();
        self.emit(RegistryEvent::InstanceRegistered {
            instance: instance.info(),
        });
        self.evaluate_capacity();
    }

    pub fn unregister(&self, instance_id: &str, reason: &str) -> Result<()> {
        let removed = self.instances.write().remove(instance_id);
        if removed.is_none() {
            return Err(Error::not_found("instance", instance_id));
        }
        self.cancel_removal(instance_id);
        tracing::info!(instance_id, reason, "instance unregistered");
        self.emit(RegistryEvent::InstanceUnregistered {
            instance_id: instance_id.to_owned(),
            reason: reason.to_owned(),
        });
        self.evaluate_capacity();
        Ok(())
    }

    // ── Lookups ────────────────────────────────────────────────────

    pub fn get_instance(&self, instance_id: &str) -> Option<Instance> {
        self.instances.read().get(instance_id).cloned()
    }

    pub fn all_instances(&self) -> Vec<Instance> {
        let mut all: Vec<_> = self.instances.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn healthy_instances(&self) -> Vec<Instance> {
        self.all_instances()
            .into_iter()
            .filter(|i| i.health.is_routable())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    // ── Selection ──────────────────────────────────────────────────

    /// Filter + strategy selection.  Returns `None` when no instance
    /// survives the filters (never an error).
    pub fn select_instance(&self, criteria: &SelectionCriteria) -> Option<Instance> {
        let snapshot = self.all_instances();
        let candidates = filter_candidates(&snapshot, criteria);
        if candidates.is_empty() {
            return None;
        }
        let tick = if criteria.strategy == SelectionStrategy::RoundRobin {
            self.round_robin.fetch_add(1, Ordering::Relaxed)
        } else {
            0
        };
        apply_strategy(candidates, criteria, tick).cloned()
    }

    // ── Capacity ───────────────────────────────────────────────────

    pub fn update_instance_capacity(
        &self,
        instance_id: &str,
        active_tasks: u32,
        max_concurrent: Option<u32>,
    ) -> Result<()> {
        {
            let mut instances = self.instances.write();
            let instance = instances
                .get_mut(instance_id)
                .ok_or_else(|| Error::not_found("instance", instance_id))?;
            instance.capacity.update(active_tasks, max_concurrent);
        }
        self.evaluate_capacity();
        Ok(())
    }

    pub fn get_available_capacity(&self) -> CapacityReport {
        let instances = self.instances.read();
        let mut report = CapacityReport {
            generated_at: Utc::now(),
            total_max_concurrent: 0,
            total_active: 0,
            total_available: 0,
            healthy_instances: 0,
            by_provider: HashMap::new(),
            by_region: HashMap::new(),
        };
        for instance in instances.values() {
            if !instance.health.is_routable() {
                continue;
            }
            report.healthy_instances += 1;
            report.total_max_concurrent += instance.capacity.max_concurrent;
            report.total_active += instance.capacity.active_tasks;
            report.total_available += instance.capacity.available;

            for (key, map) in [
                (instance.provider.to_string(), &mut report.by_provider),
                (instance.region.clone(), &mut report.by_region),
            ] {
                let slot = map.entry(key).or_default();
                slot.instances += 1;
                slot.max_concurrent += instance.capacity.max_concurrent;
                slot.active += instance.capacity.active_tasks;
                slot.available += instance.capacity.available;
            }
        }
        report
    }

    pub fn get_stats(&self) -> RegistryStats {
        let instances = self.instances.read();
        let mut stats = RegistryStats {
            total_instances: instances.len(),
            healthy: 0,
            degraded: 0,
            unhealthy: 0,
            unknown: 0,
            total_available: 0,
            instances_by_provider: HashMap::new(),
        };
        for instance in instances.values() {
            match instance.health {
                HealthStatus::Healthy => stats.healthy += 1,
                HealthStatus::Degraded => stats.degraded += 1,
                HealthStatus::Unhealthy => stats.unhealthy += 1,
                HealthStatus::Unknown => stats.unknown += 1,
            }
            if instance.health.is_routable() {
                stats.total_available += instance.capacity.available;
            }
            *stats
                .instances_by_provider
                .entry(instance.provider.to_string())
                .or_insert(0) += 1;
        }
        stats
    }

    /// Emit `capacity_changed` when available capacity moved more than 10 %
    /// or the healthy-instance count changed.
    fn evaluate_capacity(&self) {
        let report = self.get_available_capacity();
        let mut watermark = self.watermark.lock();

        let previous = watermark.available;
        let delta = report.total_available.abs_diff(previous);
        let moved_significantly = if previous == 0 {
            report.total_available > 0
        } else {
            f64::from(delta) / f64::from(previous) > 0.10
        };
        let healthy_changed = report.healthy_instances != watermark.healthy;

        watermark.available = report.total_available;
        watermark.healthy = report.healthy_instances;
        drop(watermark);

        if moved_significantly || healthy_changed {
            self.emit(RegistryEvent::CapacityChanged { report });
        }
    }

    // ── Health monitoring ──────────────────────────────────────────

    /// Start the periodic health monitor.  Restarting replaces the previous
    /// loop.
    pub fn start_health_monitoring(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let interval = Duration::from_millis(self.config.health_monitoring.interval_ms);
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                registry.run_health_checks().await;
            }
        });
        if let Some(old) = self.monitor_task.lock().replace(handle) {
            old.abort();
        }
    }

    pub fn stop_health_monitoring(&self) {
        if let Some(handle) = self.monitor_task.lock().take() {
            handle.abort();
        }
    }

    /// One monitor pass over every registered instance.  A single check
    /// failing never aborts the rest of the pass.
    pub async fn run_health_checks(self: &Arc<Self>) {
        let ids: Vec<String> = self.instances.read().keys().cloned().collect();
        for id in ids {
            let Some(instance) = self.get_instance(&id) else {
                continue;
            };
            let (verdict, detail) = self.probe_once(&instance).await;
            self.apply_health_verdict(&id, verdict, &detail);
        }
    }

    async fn probe_once(&self, instance: &Instance) -> (HealthStatus, String) {
        let timeout = Duration::from_millis(self.config.health_monitoring.timeout_ms);
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.probe.check(instance)).await {
            Ok(Ok(())) => {
                let elapsed = started.elapsed();
                if elapsed < timeout.mul_f64(0.8) {
                    (HealthStatus::Healthy, String::new())
                } else {
                    (
                        HealthStatus::Degraded,
                        format!("slow health check ({} ms)", elapsed.as_millis()),
                    )
                }
            }
            Ok(Err(e)) => (HealthStatus::Unhealthy, e.to_string()),
            Err(_) => (
                HealthStatus::Unhealthy,
                format!("health check timed out after {} ms", timeout.as_millis()),
            ),
        }
    }

    fn apply_health_verdict(self: &Arc<Self>, instance_id: &str, after: HealthStatus, detail: &str) {
        let before = {
            let mut instances = self.instances.write();
            let Some(instance) = instances.get_mut(instance_id) else {
                return;
            };
            let before = instance.health;
            instance.health = after;
            if after.is_routable() {
                instance.last_heartbeat = Utc::now();
            }
            before
        };

        if before == after {
            // Recovery timers still need cancelling when a previously
            // unhealthy instance keeps probing unhealthy-then-healthy races.
            if after.is_routable() {
                self.cancel_removal(instance_id);
            }
            return;
        }

        tracing::info!(instance_id, before = %before, after = %after, detail, "instance health changed");
        TraceEvent::InstanceHealthChanged {
            instance_id: instance_id.to_owned(),
            before: before.to_string(),
            after: after.to_string(),
        }
        .emit();
        self.emit(RegistryEvent::InstanceHealthChanged {
            instance_id: instance_id.to_owned(),
            before,
            after,
        });

        if after == HealthStatus::Unhealthy {
            self.emit(RegistryEvent::InstanceFailed {
                instance_id: instance_id.to_owned(),
                message: detail.to_owned(),
            });
            self.schedule_removal(instance_id);
        } else if after.is_routable() {
            self.cancel_removal(instance_id);
        }
        self.evaluate_capacity();
    }

    /// Remove an unhealthy instance after the grace period, unless it
    /// recovers first.
    fn schedule_removal(self: &Arc<Self>, instance_id: &str) {
        let grace = Duration::from_millis(self.config.health_monitoring.removal_grace_period_ms);
        let registry = Arc::clone(self);
        let id = instance_id.to_owned();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if registry
                .get_instance(&id)
                .map(|i| i.health == HealthStatus::Unhealthy)
                .unwrap_or(false)
            {
                let _ = registry.unregister(&id, "unhealthy_grace_expired");
            }
            registry.removal_timers.lock().remove(&id);
        });
        if let Some(old) = self
            .removal_timers
            .lock()
            .insert(instance_id.to_owned(), handle)
        {
            old.abort();
        }
    }

    fn cancel_removal(&self, instance_id: &str) {
        if let Some(handle) = self.removal_timers.lock().remove(instance_id) {
            handle.abort();
        }
    }

    // ── Discovery ──────────────────────────────────────────────────

    /// Run discovery strategies in order (all, or just `only`).  Results are
    /// aggregated; the call fails only when every attempted strategy errored
    /// and nothing was discovered.
    pub async fn discover_instances(&self, only: Option<&str>) -> Result<Vec<Instance>> {
        let strategies: Vec<Arc<dyn DiscoveryStrategy>> = self
            .strategies
            .read()
            .iter()
            .filter(|s| only.map(|n| s.name() == n).unwrap_or(true))
            .cloned()
            .collect();

        let mut aggregated: Vec<Instance> = Vec::new();
        let mut errors: Vec<Error> = Vec::new();
        let mut attempted = 0usize;

        for strategy in strategies {
            attempted += 1;
            let breaker = strategy
                .breaker_key()
                .map(|key| self.discovery_breakers.get(key));

            if let Some(breaker) = &breaker {
                if !breaker.try_acquire() {
                    let err = Error::Discovery(format!(
                        "{}: circuit breaker open",
                        strategy.name()
                    ));
                    tracing::warn!(strategy = strategy.name(), "discovery skipped, breaker open");
                    self.emit(RegistryEvent::DiscoveryFailed {
                        strategy: strategy.name().to_owned(),
                        message: err.to_string(),
                    });
                    errors.push(err);
                    continue;
                }
            }

            let existing = self.all_instances();
            match strategy.discover(&existing).await {
                Ok(found) => {
                    if let Some(breaker) = &breaker {
                        breaker.record_success();
                    }
                    tracing::info!(
                        strategy = strategy.name(),
                        discovered = found.len(),
                        "discovery completed"
                    );
                    TraceEvent::DiscoveryCompleted {
                        strategy: strategy.name().to_owned(),
                        discovered: found.len(),
                    }
                    .emit();
                    self.emit(RegistryEvent::DiscoveryCompleted {
                        strategy: strategy.name().to_owned(),
                        discovered: found.len(),
                    });
                    if strategy.auto_register() {
                        for instance in &found {
                            self.register(self.apply_defaults(instance.clone()));
                        }
                    }
                    aggregated.extend(found);
                }
                Err(e) => {
                    if let Some(breaker) = &breaker {
                        breaker.record_failure();
                    }
                    tracing::warn!(strategy = strategy.name(), error = %e, "discovery failed");
                    self.emit(RegistryEvent::DiscoveryFailed {
                        strategy: strategy.name().to_owned(),
                        message: e.to_string(),
                    });
                    errors.push(e);
                }
            }
        }

        if aggregated.is_empty() && attempted > 0 && errors.len() == attempted {
            let first = errors.remove(0);
            return Err(Error::Discovery(format!(
                "all discovery strategies failed; first error: {first}"
            )));
        }
        Ok(aggregated)
    }

    fn apply_defaults(&self, mut instance: Instance) -> Instance {
        let RegistryDefaults {
            max_concurrent,
            capabilities,
            region,
            metadata,
        } = &self.config.defaults;
        if instance.capacity.max_concurrent == 0 {
            instance
                .capacity
                .update(instance.capacity.active_tasks, Some(*max_concurrent));
        }
        if instance.capabilities.is_empty() {
            instance.capabilities = capabilities.clone();
        }
        if instance.region.is_empty() {
            instance.region = region.clone();
        }
        for (key, value) in metadata {
            instance
                .metadata
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        instance
    }

    // ── Teardown ───────────────────────────────────────────────────

    /// Stop the monitor, cancel pending removals, drop all instances.
    pub fn dispose(&self) {
        self.stop_health_monitoring();
        let timers: Vec<_> = self.removal_timers.lock().drain().collect();
        for (_, handle) in timers {
            handle.abort();
        }
        self.instances.write().clear();
        tracing::info!("registry disposed");
    }
}

impl Drop for InstanceRegistry {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor_task.get_mut().take() {
            handle.abort();
        }
        for (_, handle) in self.removal_timers.get_mut().drain() {
            handle.abort();
        }
    }
}
