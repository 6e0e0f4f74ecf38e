//! Prometheus exporter for dynamically registered application metrics.
//!
//! Metric sources register metrics by raw (dotted) name together with a live
//! value accessor. Configurable exclusion and mapping rules decide whether a
//! metric is exported and under which family name and labels. Every scrape
//! reads the accessors of one consistent registry snapshot and renders them in
//! the text or protobuf exposition format, chosen from the `Accept` header.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │ Metric sources  │────>│ FamilyRegistry  │────>│   HTTP Server   │
//! │ (register/      │     │ (rules, COW     │     │ (negotiate +    │
//! │  unregister)    │     │  snapshots)     │     │  render)        │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use prometheus_metrics_exporter::{FamilyRegistry, FnGauge, MetricKind, RuleSet};
//! use prometheus_metrics_exporter::config::{MappingRule, RulesConfig};
//!
//! let rules = RuleSet::new(&RulesConfig {
//!     exclusions: vec![],
//!     mappings: vec![
//!         MappingRule::new(r"cache\.(\w+)\.hits", "cache_hits").with_label("cache", "$1"),
//!     ],
//! })?;
//! let registry = Arc::new(FamilyRegistry::new(rules));
//! registry.register("cache.users.hits", MetricKind::Counter, Arc::new(FnGauge::new(|| 42.0)));
//! # Ok::<(), prometheus_metrics_exporter::ExporterError>(())
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod encode;
pub mod error;
pub mod http;
pub mod mapping;
pub mod metric;
pub mod negotiate;
pub mod registry;
pub mod rules;
pub mod runtime;
pub mod scrape;

pub use config::ExporterConfig;
pub use error::{ExporterError, Result};
pub use http::HttpServer;
pub use metric::{
    FnGauge, MetricKind, MetricSource, ReadoutGauge, Sample, SampleError, SummarySnapshot,
};
pub use negotiate::ResponseFormat;
pub use registry::{Family, FamilyRegistry, RegistryStats, SharedRegistry, Snapshot};
pub use rules::RuleSet;
pub use scrape::{RenderSummary, render, render_with};
