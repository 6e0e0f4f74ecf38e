//! Prometheus text exposition format, version 0.0.4.

use std::io::Write;

use super::{EncodeError, FamilyEncoder, FamilySample};
use crate::mapping::{escape_help, format_labels, format_value};
use crate::metric::{Sample, WireKind};

/// Encoder for `text/plain; version=0.0.4`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextEncoder;

impl FamilyEncoder for TextEncoder {
    fn encode_family(
        &mut self,
        sampled: &FamilySample<'_>,
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError> {
        let family = sampled.family;
        let name = family.name();

        writeln!(out, "# HELP {} {}", name, escape_help(family.help()))?;
        writeln!(out, "# TYPE {} {}", name, family.kind())?;

        for (entry, sample) in &sampled.samples {
            match (family.kind(), sample) {
                (WireKind::Gauge | WireKind::Counter, Sample::Value(value)) => {
                    writeln!(
                        out,
                        "{}{} {}",
                        name,
                        format_labels(entry.labels(), None),
                        format_value(*value)
                    )?;
                }
                (WireKind::Summary, Sample::Summary(summary)) => {
                    for (quantile, value) in &summary.quantiles {
                        let quantile = format_value(*quantile);
                        writeln!(
                            out,
                            "{}{} {}",
                            name,
                            format_labels(entry.labels(), Some(("quantile", quantile.as_str()))),
                            format_value(*value)
                        )?;
                    }
                    let labels = format_labels(entry.labels(), None);
                    writeln!(out, "{}_sum{} {}", name, labels, format_value(summary.sum))?;
                    writeln!(out, "{}_count{} {}", name, labels, summary.count)?;
                }
                _ => {
                    return Err(EncodeError::UnexpectedSample {
                        source_name: entry.source_name().to_string(),
                        kind: family.kind(),
                    });
                }
            }
        }

        Ok(())
    }
}
