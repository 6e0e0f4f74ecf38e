//! Rendering a registry snapshot into a response body.

use std::io::{BufWriter, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};

use thiserror::Error;
use tracing::{error, trace};

use crate::encode::{EncodeError, FamilyEncoder, FamilySample};
use crate::error::Result;
use crate::metric::SampleError;
use crate::negotiate::ResponseFormat;
use crate::registry::{Family, Snapshot};

/// Outcome of one render pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderSummary {
    /// Families written to the sink.
    pub families_written: usize,
    /// Families skipped because sampling or encoding failed.
    pub families_failed: usize,
    /// Bytes handed to the sink.
    pub bytes_written: usize,
}

#[derive(Debug, Error)]
enum FamilyFailure {
    #[error("reading '{source_name}' failed: {source}")]
    Sample {
        source_name: String,
        #[source]
        source: SampleError,
    },

    #[error("reading '{source_name}' panicked")]
    Panicked { source_name: String },

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Render every family of `snapshot` in `format` into `sink`.
///
/// Families are sampled and encoded one at a time into a private buffer. A
/// family whose accessors or encoding fail is logged and left out entirely;
/// the rest of the response is unaffected. Only sink errors abort the render.
pub fn render<W: Write>(
    snapshot: &Snapshot,
    format: ResponseFormat,
    sink: W,
) -> Result<RenderSummary> {
    let mut encoder = format.encoder();
    render_with(snapshot, &mut *encoder, sink)
}

/// Like [`render`], with a caller-supplied encoder.
pub fn render_with<W: Write>(
    snapshot: &Snapshot,
    encoder: &mut dyn FamilyEncoder,
    sink: W,
) -> Result<RenderSummary> {
    let mut sink = BufWriter::new(sink);
    let mut buf = Vec::new();
    let mut summary = RenderSummary::default();

    for family in snapshot.families() {
        if family.entries().is_empty() {
            trace!(family = %family.name(), "Skipping family without metrics");
            continue;
        }

        buf.clear();
        let result = sample_family(family).and_then(|sampled| {
            encoder
                .encode_family(&sampled, &mut buf)
                .map_err(FamilyFailure::from)
        });

        match result {
            Ok(()) => {
                sink.write_all(&buf)?;
                summary.families_written += 1;
                summary.bytes_written += buf.len();
            }
            Err(e) => {
                error!(
                    family = %family.name(),
                    error = %e,
                    "Not including metrics for family due to failure constructing these metrics"
                );
                summary.families_failed += 1;
            }
        }
    }

    buf.clear();
    encoder.finish(&mut buf)?;
    sink.write_all(&buf)?;
    summary.bytes_written += buf.len();
    sink.flush()?;

    Ok(summary)
}

fn sample_family(family: &Family) -> std::result::Result<FamilySample<'_>, FamilyFailure> {
    let mut samples = Vec::with_capacity(family.entries().len());

    for entry in family.entries() {
        trace!(family = %family.name(), source_name = entry.source_name(), "Sampling metric");

        let sample = catch_unwind(AssertUnwindSafe(|| entry.sample()))
            .map_err(|_| FamilyFailure::Panicked {
                source_name: entry.source_name().to_string(),
            })?
            .and_then(|sample| sample.check_kind(family.kind()).map(|()| sample))
            .map_err(|source| FamilyFailure::Sample {
                source_name: entry.source_name().to_string(),
                source,
            })?;

        samples.push((entry, sample));
    }

    Ok(FamilySample { family, samples })
}
