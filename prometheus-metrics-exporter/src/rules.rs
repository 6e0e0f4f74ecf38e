//! Routing of raw metric names through exclusion and mapping rules.
//!
//! A [`RuleSet`] is compiled once from [`RulesConfig`] and is immutable
//! afterwards. [`RuleSet::classify`] is a pure function of the raw name:
//!
//! 1. the first exclusion whose pattern matches the whole name excludes it,
//! 2. otherwise the first mapping whose pattern matches the whole name renames
//!    it and derives its labels from the capture groups,
//! 3. otherwise the name is exported as is, with `.` and `-` replaced by `_`.

use regex::{Captures, Regex};
use tracing::{debug, info};

use crate::config::{MappingRule, RulesConfig};
use crate::error::{ExporterError, Result};
use crate::mapping::default_metric_name;

/// Routing decision for a raw metric name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Matched an exclusion rule; never exported.
    Excluded,
    /// Matched a mapping rule.
    Mapped {
        name: String,
        labels: Vec<(String, String)>,
    },
    /// No rule matched; exported under the sanitized raw name.
    Unmapped { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Group(usize),
    Named(String),
}

/// A name or label template with its capture group references resolved.
///
/// Syntax: `$n` refers to group `n`, `${name}` to a named group, and a
/// backslash takes the next character literally. Multi-digit references are
/// read greedily as long as the group exists, so with three groups `$12` is
/// group 1 followed by a literal `2`.
#[derive(Debug, Clone)]
struct Template {
    parts: Vec<Part>,
}

impl Template {
    fn parse(template: &str, regex: &Regex) -> std::result::Result<Self, String> {
        let group_count = regex.captures_len();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(escaped) => literal.push(escaped),
                    None => return Err("character to be escaped is missing".to_string()),
                },
                '$' => {
                    let part = match chars.peek().copied() {
                        Some('{') => {
                            chars.next();
                            let mut name = String::new();
                            loop {
                                match chars.next() {
                                    Some('}') => break,
                                    Some(ch) if ch.is_ascii_alphanumeric() || ch == '_' => {
                                        name.push(ch)
                                    }
                                    _ => {
                                        return Err(
                                            "named group reference is not closed".to_string()
                                        );
                                    }
                                }
                            }
                            if !regex.capture_names().flatten().any(|n| n == name) {
                                return Err(format!("no group with name {{{}}}", name));
                            }
                            Part::Named(name)
                        }
                        Some(d) if d.is_ascii_digit() => {
                            chars.next();
                            let mut group = d.to_digit(10).unwrap_or_default() as usize;
                            if group >= group_count {
                                return Err(format!("no group {}", group));
                            }
                            while let Some(next) = chars.peek().and_then(|ch| ch.to_digit(10)) {
                                let candidate = group * 10 + next as usize;
                                if candidate >= group_count {
                                    break;
                                }
                                group = candidate;
                                chars.next();
                            }
                            Part::Group(group)
                        }
                        _ => return Err("illegal group reference".to_string()),
                    };
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(part);
                }
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }

        Ok(Self { parts })
    }

    /// Substitute the captures of one match. Groups that did not participate
    /// in the match expand to the empty string.
    fn expand(&self, caps: &Captures<'_>) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Group(i) => out.push_str(caps.get(*i).map_or("", |m| m.as_str())),
                Part::Named(n) => out.push_str(caps.name(n).map_or("", |m| m.as_str())),
            }
        }
        out
    }
}

/// Compile a pattern so that it only matches the complete input.
fn compile_full_match(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| ExporterError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

#[derive(Debug)]
struct CompiledMapping {
    pattern: String,
    regex: Regex,
    name: Template,
    labels: Vec<(Template, Template)>,
}

impl CompiledMapping {
    fn compile(rule: &MappingRule) -> Result<Self> {
        let regex = compile_full_match(&rule.pattern)?;
        let template = |t: &str| {
            Template::parse(t, &regex).map_err(|reason| ExporterError::InvalidTemplate {
                pattern: rule.pattern.clone(),
                template: t.to_string(),
                reason,
            })
        };

        let name = template(&rule.name)?;
        let labels = rule
            .labels
            .iter()
            .map(|l| -> Result<(Template, Template)> {
                Ok((template(&l.label)?, template(&l.value)?))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            pattern: rule.pattern.clone(),
            regex,
            name,
            labels,
        })
    }
}

/// Immutable, compiled exclusion and mapping rules.
#[derive(Debug)]
pub struct RuleSet {
    exclusions: Vec<Regex>,
    mappings: Vec<CompiledMapping>,
}

impl RuleSet {
    /// Compile all rules. Fails on the first malformed pattern or template.
    pub fn new(config: &RulesConfig) -> Result<Self> {
        let mut exclusions = Vec::with_capacity(config.exclusions.len());
        for exclusion in &config.exclusions {
            exclusions.push(compile_full_match(&exclusion.pattern)?);
            info!(pattern = %exclusion.pattern, "Initialized metrics exclusion");
        }

        let mut mappings = Vec::with_capacity(config.mappings.len());
        for rule in &config.mappings {
            mappings.push(CompiledMapping::compile(rule)?);
            info!(pattern = %rule.pattern, name = %rule.name, "Initialized metrics mapping");
        }

        Ok(Self {
            exclusions,
            mappings,
        })
    }

    /// A rule set without any rules; every metric is exported unmapped.
    pub fn empty() -> Self {
        Self {
            exclusions: Vec::new(),
            mappings: Vec::new(),
        }
    }

    /// Decide how `raw_name` is exported.
    pub fn classify(&self, raw_name: &str) -> Route {
        if self.exclusions.iter().any(|r| r.is_match(raw_name)) {
            return Route::Excluded;
        }

        for mapping in &self.mappings {
            if let Some(caps) = mapping.regex.captures(raw_name) {
                debug!(raw_name, pattern = %mapping.pattern, "Metric matches mapping");
                let name = mapping.name.expand(&caps);
                let labels = mapping
                    .labels
                    .iter()
                    .map(|(k, v)| (k.expand(&caps), v.expand(&caps)))
                    .collect();
                return Route::Mapped { name, labels };
            }
        }

        Route::Unmapped {
            name: default_metric_name(raw_name),
        }
    }
}
