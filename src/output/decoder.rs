//! Decoding of captured process output.
//!
//! The encoding is resolved once per decoder, from the caller's label or
//! by detection on the first non-empty byte buffer, and reused for every
//! later buffer.

use encoding_rs::{Encoding, UTF_8};

use crate::error::DecodeError;

/// Detection function used to pick an encoding for a byte buffer.
pub type Detector = fn(&[u8]) -> Option<&'static Encoding>;

/// Raw output handed to [`Decoder::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawOutput<'a> {
    /// Bytes read from a process stream.
    Bytes(&'a [u8]),
    /// Text that is already decoded.
    Text(&'a str),
}

impl<'a> From<&'a [u8]> for RawOutput<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        RawOutput::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for RawOutput<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        RawOutput::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for RawOutput<'a> {
    fn from(text: &'a str) -> Self {
        RawOutput::Text(text)
    }
}

/// Guess the encoding of a byte buffer.
///
/// Valid UTF-8 is reported as UTF-8; anything else goes through `chardetng`.
/// Returns `None` only for an empty buffer.
pub fn detect_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    if bytes.is_empty() {
        return None;
    }
    if std::str::from_utf8(bytes).is_ok() {
        return Some(UTF_8);
    }
    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    Some(detector.guess(None, true))
}

/// Where the encoding of a decoder stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Pending,
    Resolved(Option<&'static Encoding>),
}

/// Turns raw output into trimmed text, caching the encoding.
#[derive(Debug, Clone)]
pub struct Decoder {
    label: Option<String>,
    resolution: Resolution,
    detector: Detector,
}

impl Decoder {
    /// Create a decoder that detects the encoding from the first buffer.
    pub fn new() -> Self {
        Self {
            label: None,
            resolution: Resolution::Pending,
            detector: detect_encoding,
        }
    }

    /// Create a decoder with a caller-supplied WHATWG encoding label.
    ///
    /// An unknown label is reported by the first byte decode, not here.
    pub fn with_label(label: impl Into<String>) -> Self {
        let label = label.into();
        let resolution = match Encoding::for_label(label.trim().as_bytes()) {
            Some(encoding) => Resolution::Resolved(Some(encoding)),
            None => Resolution::Pending,
        };
        Self {
            label: Some(label),
            resolution,
            detector: detect_encoding,
        }
    }

    /// Create a decoder from an optional label.
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some(label) => Self::with_label(label),
            None => Self::new(),
        }
    }

    /// Replace the detection function.
    pub fn detector(mut self, detector: Detector) -> Self {
        self.detector = detector;
        self
    }

    /// Name of the resolved encoding, if any.
    pub fn encoding(&self) -> Option<&'static str> {
        match self.resolution {
            Resolution::Resolved(Some(encoding)) => Some(encoding.name()),
            _ => None,
        }
    }

    /// Whether an encoding lookup has already happened.
    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Resolution::Resolved(_))
    }

    /// Decode raw output.
    ///
    /// Empty input yields `None`. Text is returned as-is; bytes are decoded
    /// with the cached encoding and trimmed. A failed detection is cached
    /// too, so every later byte buffer reports [`DecodeError::Undetected`].
    pub fn decode<'a>(
        &mut self,
        raw: impl Into<RawOutput<'a>>,
    ) -> Result<Option<String>, DecodeError> {
        let bytes = match raw.into() {
            RawOutput::Text(text) if text.is_empty() => return Ok(None),
            RawOutput::Text(text) => return Ok(Some(text.to_owned())),
            RawOutput::Bytes(bytes) if bytes.is_empty() => return Ok(None),
            RawOutput::Bytes(bytes) => bytes,
        };

        let encoding = self.resolve(bytes)?;
        let text = encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .ok_or(DecodeError::Malformed {
                encoding: encoding.name(),
            })?;
        Ok(Some(text.trim().to_owned()))
    }

    fn resolve(&mut self, bytes: &[u8]) -> Result<&'static Encoding, DecodeError> {
        if let Some(label) = &self.label {
            if self.resolution == Resolution::Pending {
                return Err(DecodeError::UnknownLabel(label.clone()));
            }
        }
        let resolved = match self.resolution {
            Resolution::Resolved(encoding) => encoding,
            Resolution::Pending => {
                let detected = (self.detector)(bytes);
                tracing::debug!(
                    encoding = detected.map(Encoding::name),
                    "resolved output encoding"
                );
                self.resolution = Resolution::Resolved(detected);
                detected
            }
        };
        resolved.ok_or(DecodeError::Undetected)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
