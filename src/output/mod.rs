//! Output processing.
//!
//! This module turns raw bytes captured from a process into text:
//! - Encoding detection on the first buffer
//! - Decoding with the cached encoding
//! - Whitespace trimming of decoded output

mod decoder;

pub use decoder::{detect_encoding, Decoder, Detector, RawOutput};
