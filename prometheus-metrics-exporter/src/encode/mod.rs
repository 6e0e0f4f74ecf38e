//! Wire encoders for the Prometheus exposition formats.

pub mod protobuf;
pub mod text;

pub use protobuf::ProtobufEncoder;
pub use text::TextEncoder;

use thiserror::Error;

use crate::metric::{Sample, WireKind};
use crate::registry::{Entry, Family};

/// A family together with the values sampled from its entries.
#[derive(Debug)]
pub struct FamilySample<'a> {
    pub family: &'a Family,
    pub samples: Vec<(&'a Entry, Sample)>,
}

/// Encoding failure for one family.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("sample of '{source_name}' does not fit a {kind} family")]
    UnexpectedSample {
        source_name: String,
        kind: WireKind,
    },

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("protobuf encoding failed: {0}")]
    Protobuf(#[from] prost::EncodeError),
}

/// Serializes sampled families into an exposition format.
pub trait FamilyEncoder {
    /// Append the encoding of `family` to `out`.
    ///
    /// On error `out` may hold a partial encoding; callers discard it.
    fn encode_family(
        &mut self,
        family: &FamilySample<'_>,
        out: &mut Vec<u8>,
    ) -> Result<(), EncodeError>;

    /// Append whatever follows the last family.
    fn finish(&mut self, _out: &mut Vec<u8>) -> Result<(), EncodeError> {
        Ok(())
    }
}
