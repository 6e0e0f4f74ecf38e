//! Host and process metrics backed by `sysinfo`.
//!
//! Every family is registered once. Its entries share one [`Refreshed`]
//! handle, so a scrape refreshes the underlying `sysinfo` data once per
//! family instead of once per entry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::{NetworkData, Networks, Pid, Process, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::metric::{FnGauge, MetricSource, ReadoutGauge, Sample, SampleError, WireKind};
use crate::registry::{Family, FamilyRegistry};

/// Reads closer together than this share one refresh.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// `sysinfo` data refreshed lazily on read, at most once per
/// [`MIN_REFRESH_INTERVAL`].
struct Refreshed<T> {
    state: Mutex<RefreshState<T>>,
    refresh: Box<dyn Fn(&mut T) + Send + Sync>,
}

struct RefreshState<T> {
    value: T,
    refreshed_at: Option<Instant>,
}

impl<T: Send> Refreshed<T> {
    fn new(value: T, refresh: impl Fn(&mut T) + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RefreshState {
                value,
                refreshed_at: None,
            }),
            refresh: Box::new(refresh),
        })
    }

    fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let mut state = self.state.lock();
        let stale = state
            .refreshed_at
            .is_none_or(|at| at.elapsed() >= MIN_REFRESH_INTERVAL);
        if stale {
            (self.refresh)(&mut state.value);
            state.refreshed_at = Some(Instant::now());
        }
        f(&state.value)
    }
}

/// Register runtime metric families. Returns the number of families added.
pub fn register_runtime_metrics(
    registry: &FamilyRegistry,
    config: &RuntimeConfig,
) -> Result<usize> {
    if !config.enabled {
        return Ok(0);
    }

    let memory = Refreshed::new(System::new(), System::refresh_memory);
    let cpu = Refreshed::new(System::new(), System::refresh_cpu_usage);

    let mut families = vec![
        Family::new("system_uptime_seconds", "Seconds since the host booted", WireKind::Gauge)
            .with_entry("system.uptime", &[], gauge(|| System::uptime() as f64)),
        Family::new("system_load_average", "Host load average", WireKind::Gauge)
            .with_entry(
                "system.load.1m",
                &[("period", "1m")],
                gauge(|| System::load_average().one),
            )
            .with_entry(
                "system.load.5m",
                &[("period", "5m")],
                gauge(|| System::load_average().five),
            )
            .with_entry(
                "system.load.15m",
                &[("period", "15m")],
                gauge(|| System::load_average().fifteen),
            ),
        Family::new("system_memory_bytes", "Host memory", WireKind::Gauge)
            .with_entry(
                "system.memory.total",
                &[("type", "total")],
                system_gauge(&memory, System::total_memory),
            )
            .with_entry(
                "system.memory.used",
                &[("type", "used")],
                system_gauge(&memory, System::used_memory),
            )
            .with_entry(
                "system.memory.available",
                &[("type", "available")],
                system_gauge(&memory, System::available_memory),
            )
            .with_entry(
                "system.swap.total",
                &[("type", "swap_total")],
                system_gauge(&memory, System::total_swap),
            )
            .with_entry(
                "system.swap.used",
                &[("type", "swap_used")],
                system_gauge(&memory, System::used_swap),
            ),
        Family::new(
            "system_cpu_usage_percent",
            "Host CPU usage since the previous scrape",
            WireKind::Gauge,
        )
        .with_entry(
            "system.cpu.usage",
            &[],
            gauge(move || cpu.read(|s| s.global_cpu_usage() as f64)),
        ),
    ];

    match sysinfo::get_current_pid() {
        Ok(pid) => families.extend(process_families(pid)),
        Err(e) => warn!(error = e, "Cannot determine own process id, skipping process metrics"),
    }

    if config.network {
        families.extend(network_family());
    }

    let count = families.len();
    for family in families {
        registry.register_family(family)?;
    }

    info!(families = count, network = config.network, "Registered runtime metrics");
    Ok(count)
}

fn gauge<F>(read: F) -> Arc<dyn MetricSource>
where
    F: Fn() -> f64 + Send + Sync + 'static,
{
    Arc::new(FnGauge::new(read))
}

fn system_gauge(
    system: &Arc<Refreshed<System>>,
    read: fn(&System) -> u64,
) -> Arc<dyn MetricSource> {
    let system = system.clone();
    gauge(move || system.read(|s| read(s) as f64))
}

fn process_families(pid: Pid) -> Vec<Family> {
    let system = Refreshed::new(System::new(), move |s: &mut System| {
        s.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    });

    vec![
        Family::new("process_memory_bytes", "Memory of this process", WireKind::Gauge)
            .with_entry(
                "process.memory.resident",
                &[("type", "resident")],
                process(&system, pid, |p| p.memory() as f64),
            )
            .with_entry(
                "process.memory.virtual",
                &[("type", "virtual")],
                process(&system, pid, |p| p.virtual_memory() as f64),
            ),
        Family::new(
            "process_cpu_usage_percent",
            "CPU usage of this process since the previous scrape",
            WireKind::Gauge,
        )
        .with_entry(
            "process.cpu.usage",
            &[],
            process(&system, pid, |p| p.cpu_usage() as f64),
        ),
        Family::new(
            "process_run_time_seconds",
            "Seconds since this process started",
            WireKind::Gauge,
        )
        .with_entry(
            "process.run_time",
            &[],
            process(&system, pid, |p| p.run_time() as f64),
        ),
    ]
}

fn process(
    system: &Arc<Refreshed<System>>,
    pid: Pid,
    read: fn(&Process) -> f64,
) -> Arc<dyn MetricSource> {
    let system = system.clone();
    Arc::new(move || -> std::result::Result<Sample, SampleError> {
        system
            .read(|s| s.process(pid).map(read))
            .map(Sample::Value)
            .ok_or_else(|| SampleError::Unavailable(format!("process {} not found", pid)))
    })
}

/// Per-interface traffic, both as running totals (`aggregation="sum"`) and as
/// the change since the previous scrape (`aggregation="none"`).
///
/// Interfaces are enumerated once. One that disappears later keeps reporting
/// its last seen totals, so its readouts drop to zero.
fn network_family() -> Option<Family> {
    let networks = Networks::new_with_refreshed_list();
    let mut interfaces: Vec<String> = networks.list().keys().cloned().collect();
    if interfaces.is_empty() {
        return None;
    }
    interfaces.sort();

    let networks = Refreshed::new(networks, |n: &mut Networks| n.refresh(true));
    let directions: [(&str, fn(&NetworkData) -> u64); 2] = [
        ("received", NetworkData::total_received),
        ("transmitted", NetworkData::total_transmitted),
    ];

    let mut family = Family::new(
        "system_network_bytes",
        "Network traffic per interface",
        WireKind::Gauge,
    );
    for interface in &interfaces {
        for (direction, read) in directions {
            let base = format!("system.network.{}.{}", interface, direction);

            let total = last_known(network_total(networks.clone(), interface.clone(), read));
            family = family.with_entry(
                base.clone(),
                &[
                    ("interface", interface.as_str()),
                    ("direction", direction),
                    ("aggregation", "sum"),
                ],
                gauge(move || total() as f64),
            );

            let total = last_known(network_total(networks.clone(), interface.clone(), read));
            family = family.with_entry(
                format!("{}.readout", base),
                &[
                    ("interface", interface.as_str()),
                    ("direction", direction),
                    ("aggregation", "none"),
                ],
                Arc::new(ReadoutGauge::new(total)),
            );
        }
    }

    Some(family)
}

fn network_total(
    networks: Arc<Refreshed<Networks>>,
    interface: String,
    read: fn(&NetworkData) -> u64,
) -> impl Fn() -> Option<u64> + Send + Sync + 'static {
    move || {
        let total = networks.read(|n| n.list().get(&interface).map(read));
        if total.is_none() {
            debug!(interface = %interface, "Network interface is gone");
        }
        total
    }
}

/// Remember the last total `read` returned and report it while `read` has
/// nothing.
fn last_known<F>(read: F) -> impl Fn() -> u64 + Send + Sync + 'static
where
    F: Fn() -> Option<u64> + Send + Sync + 'static,
{
    let last = AtomicU64::new(0);
    move || match read() {
        Some(total) => {
            last.store(total, Ordering::Relaxed);
            total
        }
        None => last.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiate::ResponseFormat;
    use crate::rules::RuleSet;
    use crate::scrape::render;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_disabled_registers_nothing() {
        let registry = FamilyRegistry::new(RuleSet::empty());
        let count = register_runtime_metrics(&registry, &RuntimeConfig::default()).unwrap();

        assert_eq!(count, 0);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_runtime_families_render() {
        let registry = FamilyRegistry::new(RuleSet::empty());
        let config = RuntimeConfig {
            enabled: true,
            network: false,
        };
        let count = register_runtime_metrics(&registry, &config).unwrap();
        assert!(count >= 4);

        let snapshot = registry.snapshot();
        assert!(snapshot.get("system_uptime_seconds").is_some());
        assert_eq!(snapshot.get("system_load_average").unwrap().entries().len(), 3);
        assert!(snapshot.get("system_network_bytes").is_none());

        let mut out = Vec::new();
        let summary = render(&snapshot, ResponseFormat::Text, &mut out).unwrap();
        assert_eq!(summary.families_failed, 0);

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("# TYPE system_memory_bytes gauge\n"));
        assert!(text.contains("system_memory_bytes{type=\"total\"} "));
    }

    #[test]
    fn test_network_entries_come_in_pairs() {
        let Some(family) = network_family() else {
            return;
        };

        assert_eq!(family.entries().len() % 4, 0);
        let readouts = family
            .entries()
            .iter()
            .filter(|e| e.labels().contains(&("aggregation".to_string(), "none".to_string())))
            .count();
        assert_eq!(readouts * 2, family.entries().len());
    }

    #[test]
    fn test_refresh_is_shared_by_close_reads() {
        let refreshes = Arc::new(AtomicUsize::new(0));
        let counter = refreshes.clone();
        let shared = Refreshed::new(0u64, move |v: &mut u64| {
            *v += 1;
            counter.fetch_add(1, Ordering::Relaxed);
        });

        let reads: Vec<u64> = (0..5).map(|_| shared.read(|v| *v)).collect();

        assert_eq!(reads, vec![1; 5]);
        assert_eq!(refreshes.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_vanished_interface_keeps_last_totals() {
        let readings = Arc::new(Mutex::new(VecDeque::from([Some(100), Some(150), None, None])));
        let source = readings.clone();
        let total = last_known(move || source.lock().pop_front().flatten());

        assert_eq!(total(), 100);
        assert_eq!(total(), 150);
        assert_eq!(total(), 150);
        assert_eq!(total(), 150);
    }

    #[test]
    fn test_vanished_interface_does_not_fail_family() {
        let gone = Arc::new(AtomicU64::new(0));
        let state = gone.clone();
        let stub = move || match state.load(Ordering::Relaxed) {
            0 => Some(1_000),
            _ => None,
        };
        let sum_read = last_known(stub.clone());
        let readout_read = last_known(stub);

        let registry = FamilyRegistry::new(RuleSet::empty());
        let family = Family::new("net_bytes", "", WireKind::Gauge)
            .with_entry("sum", &[("aggregation", "sum")], gauge(move || sum_read() as f64))
            .with_entry(
                "readout",
                &[("aggregation", "none")],
                Arc::new(ReadoutGauge::new(readout_read)),
            );
        registry.register_family(family).unwrap();

        let scrape = || {
            let mut out = Vec::new();
            let summary = render(&registry.snapshot(), ResponseFormat::Text, &mut out).unwrap();
            assert_eq!(summary.families_failed, 0);
            String::from_utf8(out).unwrap()
        };

        let first = scrape();
        assert!(first.contains("net_bytes{aggregation=\"sum\"} 1000\n"));
        assert!(first.contains("net_bytes{aggregation=\"none\"} 1000\n"));

        gone.store(1, Ordering::Relaxed);
        let second = scrape();
        assert!(second.contains("net_bytes{aggregation=\"sum\"} 1000\n"));
        assert!(second.contains("net_bytes{aggregation=\"none\"} 0\n"));
    }
}
