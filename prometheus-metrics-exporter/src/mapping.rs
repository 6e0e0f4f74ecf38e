//! Naming and formatting helpers shared by the rule engine and encoders.

/// Check whether `name` is a valid Prometheus metric name.
///
/// Prometheus metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Derive the exported name of a metric that no mapping rule matched.
///
/// Only `.` and `-` are replaced with `_`. Everything else is kept as is, so
/// the result is not guaranteed to be a valid metric name.
pub fn default_metric_name(raw_name: &str) -> String {
    raw_name
        .chars()
        .map(|c| match c {
            '.' | '-' => '_',
            c => c,
        })
        .collect()
}

/// Escape special characters in label values.
pub fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Escape special characters in `# HELP` text.
pub fn escape_help(help: &str) -> String {
    let mut result = String::with_capacity(help.len());
    for c in help.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a floating point value for Prometheus.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

/// Format labels for Prometheus exposition format.
///
/// `extra` is appended after `labels`, used for the `quantile` label of
/// summaries.
pub fn format_labels(labels: &[(String, String)], extra: Option<(&str, &str)>) -> String {
    if labels.is_empty() && extra.is_none() {
        return String::new();
    }

    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();
    if let Some((k, v)) = extra {
        parts.push(format!("{}=\"{}\"", k, escape_label_value(v)));
    }

    format!("{{{}}}", parts.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_metric_names() {
        assert!(is_valid_metric_name("cpu_usage"));
        assert!(is_valid_metric_name("_private"));
        assert!(is_valid_metric_name("foo:bar:baz"));
        assert!(is_valid_metric_name("keyspace_CasProposeLatency"));
    }

    #[test]
    fn test_invalid_metric_names() {
        assert!(!is_valid_metric_name(""));
        assert!(!is_valid_metric_name("1cpu"));
        assert!(!is_valid_metric_name("cpu.usage"));
        assert!(!is_valid_metric_name("cpu usage"));
        assert!(!is_valid_metric_name("disk[sda]"));
    }

    #[test]
    fn test_default_metric_name() {
        assert_eq!(default_metric_name("gauge1"), "gauge1");
        assert_eq!(
            default_metric_name("org.apache.cassandra.metrics.Cache.Hits"),
            "org_apache_cassandra_metrics_Cache_Hits"
        );
        assert_eq!(default_metric_name("thread-pool.active"), "thread_pool_active");
    }

    #[test]
    fn test_default_metric_name_keeps_other_characters() {
        // Best effort only: the result may still be invalid
        assert_eq!(default_metric_name("1.disk[sda]"), "1_disk[sda]");
        assert!(!is_valid_metric_name(&default_metric_name("1.disk[sda]")));
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[test]
    fn test_escape_help() {
        assert_eq!(escape_help("direct metric"), "direct metric");
        assert_eq!(escape_help("a\\b\nc\"d"), "a\\\\b\\nc\"d");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(3.14), "3.14");
        assert_eq!(format_value(-2.5), "-2.5");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }

    #[test]
    fn test_format_labels() {
        let labels = vec![
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ];

        assert_eq!(format_labels(&labels, None), "{a=\"1\",b=\"2\"}");
        assert_eq!(
            format_labels(&labels, Some(("quantile", "0.5"))),
            "{a=\"1\",b=\"2\",quantile=\"0.5\"}"
        );
        assert_eq!(format_labels(&[], None), "");
        assert_eq!(
            format_labels(&[], Some(("quantile", "0.99"))),
            "{quantile=\"0.99\"}"
        );
    }
}
