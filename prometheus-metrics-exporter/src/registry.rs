//! Registry of metric families exposed to scrapers.
//!
//! Writers (register/unregister) are serialized and publish a new immutable
//! [`Snapshot`] on every change. Readers grab the current snapshot once and
//! work from it, so a scrape never sees a half-applied update.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::{ExporterError, Result};
use crate::mapping::is_valid_metric_name;
use crate::metric::{MetricKind, MetricSource, Sample, SampleError, WireKind};
use crate::rules::{Route, RuleSet};

/// Help text of families created through a mapping rule.
pub const DERIVED_HELP: &str = "derived metric";

/// Help text of families created under the sanitized raw name.
pub const DIRECT_HELP: &str = "direct metric";

/// One metric's contribution to a family.
#[derive(Clone)]
pub struct Entry {
    source_name: String,
    labels: Vec<(String, String)>,
    source: Arc<dyn MetricSource>,
}

impl Entry {
    pub fn new(
        source_name: impl Into<String>,
        labels: Vec<(String, String)>,
        source: Arc<dyn MetricSource>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            labels,
            source,
        }
    }

    /// Raw name of the metric that produced this entry.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    /// Read the live value.
    pub fn sample(&self) -> std::result::Result<Sample, SampleError> {
        self.source.sample()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("source_name", &self.source_name)
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

/// A named group of entries sharing one exported name and wire kind.
#[derive(Debug, Clone)]
pub struct Family {
    name: String,
    help: String,
    kind: WireKind,
    entries: Vec<Entry>,
}

impl Family {
    pub fn new(name: impl Into<String>, help: impl Into<String>, kind: WireKind) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
            entries: Vec::new(),
        }
    }

    /// Add an entry, builder style.
    pub fn with_entry(
        mut self,
        source_name: impl Into<String>,
        labels: &[(&str, &str)],
        source: Arc<dyn MetricSource>,
    ) -> Self {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.upsert(Entry::new(source_name, labels, source));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    pub fn kind(&self) -> WireKind {
        self.kind
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Insert `entry`, replacing an entry with the same source name in place.
    fn upsert(&mut self, entry: Entry) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.source_name == entry.source_name)
        {
            Some(existing) => {
                *existing = entry;
                true
            }
            None => {
                self.entries.push(entry);
                false
            }
        }
    }

    fn remove(&mut self, source_name: &str) -> bool {
        match self
            .entries
            .iter()
            .position(|e| e.source_name == source_name)
        {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Immutable view of all families at one point in time.
#[derive(Debug, Default)]
pub struct Snapshot {
    families: BTreeMap<String, Arc<Family>>,
}

impl Snapshot {
    /// Families ordered by name.
    pub fn families(&self) -> impl Iterator<Item = &Family> {
        self.families.values().map(|f| f.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&Family> {
        self.families.get(name).map(|f| f.as_ref())
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Metrics added or replaced.
    pub registered: u64,
    /// Registrations ignored because of an exclusion rule.
    pub excluded: u64,
    /// Registrations dropped because the mapped name is invalid.
    pub dropped_invalid_name: u64,
    /// Registrations dropped because the family has a different kind.
    pub dropped_kind_conflict: u64,
    /// Metrics or families removed.
    pub unregistered: u64,
}

/// Thread-safe family registry.
pub struct FamilyRegistry {
    rules: RuleSet,
    /// Currently published snapshot. Loading and storing never lock.
    current: ArcSwap<Snapshot>,
    /// Serializes writers across classification, copy and publish.
    writer: Mutex<()>,
    stats: RwLock<RegistryStats>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<FamilyRegistry>;

impl FamilyRegistry {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            rules,
            current: ArcSwap::from_pointee(Snapshot::default()),
            writer: Mutex::new(()),
            stats: RwLock::new(RegistryStats::default()),
        }
    }

    /// The current snapshot. Later registry changes do not affect it.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Get registry statistics.
    pub fn stats(&self) -> RegistryStats {
        self.stats.read().clone()
    }

    fn publish(&self, families: BTreeMap<String, Arc<Family>>) {
        self.current.store(Arc::new(Snapshot { families }));
    }

    /// Register a metric under the family its raw name routes to.
    ///
    /// Excluded metrics, metrics mapped to an invalid name and metrics whose
    /// kind conflicts with an existing family are logged and dropped.
    /// Registering a raw name that is already present replaces its entry.
    pub fn register(&self, raw_name: &str, kind: MetricKind, source: Arc<dyn MetricSource>) {
        let _writer = self.writer.lock();
        let wire_kind = kind.wire_kind();

        let (name, help, labels) = match self.rules.classify(raw_name) {
            Route::Excluded => {
                debug!(raw_name, "Metric excluded");
                self.stats.write().excluded += 1;
                return;
            }
            Route::Mapped { name, labels } => {
                if !is_valid_metric_name(&name) {
                    warn!(raw_name, name = %name, "Invalid Prometheus metric name");
                    self.stats.write().dropped_invalid_name += 1;
                    return;
                }
                (name, DERIVED_HELP, labels)
            }
            Route::Unmapped { name } => {
                debug!(raw_name, "No matching metric mapping");
                if !is_valid_metric_name(&name) {
                    warn!(raw_name, name = %name, "Metric name does not validate");
                }
                (name, DIRECT_HELP, Vec::new())
            }
        };

        let current = self.snapshot();
        let mut family = match current.families.get(&name) {
            Some(existing) if existing.kind != wire_kind => {
                error!(
                    family = %name,
                    family_kind = %existing.kind,
                    raw_name,
                    kind = %wire_kind,
                    "Existing metrics are of a different type than the metric to be registered"
                );
                self.stats.write().dropped_kind_conflict += 1;
                return;
            }
            Some(existing) => Family::clone(existing),
            None => Family::new(name.clone(), help, wire_kind),
        };

        if family.upsert(Entry::new(raw_name, labels, source)) {
            debug!(raw_name, family = %name, "Replaced existing metric");
        }

        let mut families = current.families.clone();
        families.insert(name, Arc::new(family));
        self.publish(families);
        self.stats.write().registered += 1;
    }

    /// Remove a metric previously passed to [`register`](Self::register).
    ///
    /// Unknown metrics are ignored. A metric exported under its sanitized raw
    /// name takes its whole family with it.
    pub fn unregister(&self, raw_name: &str) {
        let _writer = self.writer.lock();
        let current = self.snapshot();

        let families = match self.rules.classify(raw_name) {
            Route::Excluded => return,
            Route::Mapped { name, .. } => {
                let Some(existing) = current.families.get(&name) else {
                    debug!(raw_name, family = %name, "No family to unregister metric from");
                    return;
                };
                let mut family = Family::clone(existing);
                if !family.remove(raw_name) {
                    debug!(raw_name, family = %name, "Metric not registered in family");
                    return;
                }
                let mut families = current.families.clone();
                families.insert(name, Arc::new(family));
                families
            }
            Route::Unmapped { name } => {
                let mut families = current.families.clone();
                if families.remove(&name).is_none() {
                    debug!(raw_name, family = %name, "No family to unregister");
                    return;
                }
                families
            }
        };

        self.publish(families);
        self.stats.write().unregistered += 1;
    }

    /// Publish a complete family, bypassing the rules.
    ///
    /// Used by metric sources that label their own entries. Replaces any
    /// family of the same name.
    pub fn register_family(&self, family: Family) -> Result<()> {
        if !is_valid_metric_name(&family.name) {
            return Err(ExporterError::InvalidMetricName(family.name));
        }

        let _writer = self.writer.lock();
        let current = self.snapshot();
        info!(
            family = %family.name,
            kind = %family.kind,
            entries = family.entries.len(),
            "Registering metric family"
        );

        let mut families = current.families.clone();
        families.insert(family.name.clone(), Arc::new(family));
        self.publish(families);
        self.stats.write().registered += 1;
        Ok(())
    }

    /// The name `raw_name` is exported under, or `None` if it would not be
    /// exported. Does not register anything.
    pub fn mapped_name(&self, raw_name: &str) -> Option<String> {
        match self.rules.classify(raw_name) {
            Route::Excluded => None,
            Route::Mapped { name, .. } if !is_valid_metric_name(&name) => None,
            Route::Mapped { name, .. } | Route::Unmapped { name } => Some(name),
        }
    }

    /// The labels `raw_name` is exported with, or `None` if it would not be
    /// exported. Does not register anything.
    pub fn mapped_labels(&self, raw_name: &str) -> Option<Vec<(String, String)>> {
        match self.rules.classify(raw_name) {
            Route::Excluded => None,
            Route::Mapped { name, .. } if !is_valid_metric_name(&name) => None,
            Route::Mapped { labels, .. } => Some(labels),
            Route::Unmapped { .. } => Some(Vec::new()),
        }
    }
}
