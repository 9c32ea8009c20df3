use encoding_rs::{Encoding, UTF_8};
use thiserror::Error;

use crate::error::{HarvestError, Result};
use crate::ingest::detector::encoding_for_label;

/// Why a file with a detected encoding still could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("content is not valid {encoding}")]
    Malformed { encoding: &'static str },

    #[error("content has characters not representable in {encoding}")]
    Unmappable { encoding: &'static str },
}

/// Decodes with the detected source encoding, then round-trips the text
/// through the target encoding.
#[derive(Debug, Clone, Copy)]
pub struct TextNormalizer {
    target: &'static Encoding,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self { target: UTF_8 }
    }
}

impl TextNormalizer {
    /// Normalizer for a WHATWG target label (`utf-8`, `gbk`, ...).
    pub fn new(target_label: &str) -> Result<Self> {
        let target = encoding_for_label(target_label).ok_or_else(|| {
            HarvestError::UnknownEncoding {
                label: target_label.to_string(),
            }
        })?;
        Ok(Self { target })
    }

    #[must_use]
    pub fn target(&self) -> &'static Encoding {
        self.target
    }

    /// Normalize `raw` bytes that were detected as `source`.
    ///
    /// A BOM for `source` is stripped. Malformed input is an error, never
    /// replaced with U+FFFD.
    pub fn normalize(
        &self,
        raw: &[u8],
        source: &'static Encoding,
    ) -> std::result::Result<String, NormalizeError> {
        let body = match Encoding::for_bom(raw) {
            Some((bom_encoding, bom_len)) if bom_encoding == source => &raw[bom_len..],
            _ => raw,
        };

        let text = source
            .decode_without_bom_handling_and_without_replacement(body)
            .ok_or(NormalizeError::Malformed {
                encoding: source.name(),
            })?;

        let (encoded, used, unmappable) = self.target.encode(&text);
        if unmappable {
            return Err(NormalizeError::Unmappable {
                encoding: self.target.name(),
            });
        }

        // UTF-16 targets encode as UTF-8 in encoding_rs; `used` says which.
        let round_trip = used
            .decode_without_bom_handling_and_without_replacement(&encoded)
            .ok_or(NormalizeError::Malformed {
                encoding: used.name(),
            })?;

        Ok(round_trip.into_owned())
    }
}
