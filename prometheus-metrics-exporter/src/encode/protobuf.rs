//! Length-delimited `io.prometheus.client.MetricFamily` messages.

use prost::Message;

use super::{EncodeError, FamilyEncoder, FamilySample};
use crate::metric::{Sample, WireKind};

/// Messages of the Prometheus client data model, generated from
/// `proto/metrics.proto`.
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/io.prometheus.client.rs"));
}

impl From<WireKind> for proto::MetricType {
    fn from(kind: WireKind) -> Self {
        match kind {
            WireKind::Gauge => proto::MetricType::Gauge,
            WireKind::Counter => proto::MetricType::Counter,
            WireKind::Summary => proto::MetricType::Summary,
        }
    }
}

/// Encoder for `application/vnd.google.protobuf; encoding=delimited`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtobufEncoder;

impl FamilyEncoder for ProtobufEncoder {
    fn encode_family(
        &mut self,
        sampled: &FamilySample<'_>,
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        let family = sampled.family;
        let mut message = proto::MetricFamily {
            name: Some(family.name().to_string()),
            help: Some(family.help().to_string()),
            r#type: Some(proto::MetricType::from(family.kind()) as i32),
            metric: Vec::with_capacity(sampled.samples.len()),
        };

        for (entry, sample) in &sampled.samples {
            let mut metric = proto::Metric {
                label: entry
                    .labels()
                    .iter()
                    .map(|(name, value)| proto::LabelPair {
                        name: Some(name.clone()),
                        value: Some(value.clone()),
                    })
                    .collect(),
                ..Default::default()
            };

            match (family.kind(), sample) {
                (WireKind::Gauge, Sample::Value(value)) => {
                    metric.gauge = Some(proto::Gauge {
                        value: Some(*value),
                    });
                }
                (WireKind::Counter, Sample::Value(value)) => {
                    metric.counter = Some(proto::Counter {
                        value: Some(*value),
                    });
                }
                (WireKind::Summary, Sample::Summary(summary)) => {
                    metric.summary = Some(proto::Summary {
                        sample_count: Some(summary.count),
                        sample_sum: Some(summary.sum),
                        quantile: summary
                            .quantiles
                            .iter()
                            .map(|&(quantile, value)| proto::Quantile {
                                quantile: Some(quantile),
                                value: Some(value),
                            })
                            .collect(),
                    });
                }
                _ => {
                    return Err(EncodeError::UnexpectedSample {
                        source_name: entry.source_name().to_string(),
                        kind: family.kind(),
                    });
                }
            }

            message.metric.push(metric);
        }

        message.encode_length_delimited(out)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::proto::{MetricFamily, MetricType};
    use super::*;
    use crate::metric::{FnGauge, MetricSource, SummarySnapshot};
    use crate::registry::Family;
    use std::sync::Arc;

    fn source() -> Arc<dyn MetricSource> {
        Arc::new(FnGauge::new(|| 0.0))
    }

    fn encode(family: &Family, samples: Vec<Sample>) -> Vec<u8> {
        let sampled = FamilySample {
            family,
            samples: family.entries().iter().zip(samples).collect(),
        };
        let mut out = Vec::new();
        ProtobufEncoder.encode_family(&sampled, &mut out).unwrap();
        out
    }

    #[test]
    fn test_gauge_family() {
        let family = Family::new("pool_size", "derived metric", WireKind::Gauge)
            .with_entry("pool.a", &[("pool", "a")], source());

        let bytes = encode(&family, vec![Sample::Value(4.0)]);
        let decoded = MetricFamily::decode_length_delimited(bytes.as_slice()).unwrap();

        assert_eq!(decoded.name.as_deref(), Some("pool_size"));
        assert_eq!(decoded.help.as_deref(), Some("derived metric"));
        assert_eq!(decoded.r#type, Some(MetricType::Gauge as i32));
        assert_eq!(decoded.metric.len(), 1);

        let metric = &decoded.metric[0];
        assert_eq!(metric.label[0].name.as_deref(), Some("pool"));
        assert_eq!(metric.label[0].value.as_deref(), Some("a"));
        assert_eq!(metric.gauge.as_ref().and_then(|g| g.value), Some(4.0));
        assert!(metric.counter.is_none());
    }

    #[test]
    fn test_summary_family() {
        let family = Family::new("hist1", "direct metric", WireKind::Summary).with_entry(
            "hist1",
            &[],
            source(),
        );

        let bytes = encode(
            &family,
            vec![Sample::Summary(SummarySnapshot::from_values(&[1.0]))],
        );
        let decoded = MetricFamily::decode_length_delimited(bytes.as_slice()).unwrap();

        assert_eq!(decoded.r#type, Some(MetricType::Summary as i32));
        let summary = decoded.metric[0].summary.as_ref().unwrap();
        assert_eq!(summary.sample_count, Some(1));
        assert_eq!(summary.sample_sum, Some(1.0));
        assert_eq!(summary.quantile.len(), 6);
        assert_eq!(summary.quantile[0].quantile, Some(0.5));
    }

    #[test]
    fn test_metric_type_wire_values() {
        assert_eq!(MetricType::Counter as i32, 0);
        assert_eq!(MetricType::Gauge as i32, 1);
        assert_eq!(MetricType::Summary as i32, 2);
        assert_eq!(MetricType::from(WireKind::Counter).as_str_name(), "COUNTER");
    }

    #[test]
    fn test_consecutive_families_are_delimited() {
        let counter = Family::new("a_total", "", WireKind::Counter).with_entry("a", &[], source());
        let gauge = Family::new("b", "", WireKind::Gauge).with_entry("b", &[], source());

        let mut bytes = encode(&counter, vec![Sample::Value(1.0)]);
        bytes.extend(encode(&gauge, vec![Sample::Value(2.0)]));

        let mut buf = bytes.as_slice();
        let first = MetricFamily::decode_length_delimited(&mut buf).unwrap();
        let second = MetricFamily::decode_length_delimited(&mut buf).unwrap();
        assert!(buf.is_empty());
        assert_eq!(first.name.as_deref(), Some("a_total"));
        assert_eq!(
            first.metric[0].counter.as_ref().and_then(|c| c.value),
            Some(1.0)
        );
        assert_eq!(second.name.as_deref(), Some("b"));
    }
}
