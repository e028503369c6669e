//! Audio value types and pure sample conversions
//!
//! Device-owning capture and playback engines live in `crate::voice`.

mod codec;
mod format;

pub use codec::{
    float_to_pcm16, from_transport_text, pcm16_bytes_to_float, pcm16_to_bytes, pcm16_to_float,
    resample, rms_level, to_transport_text,
};
pub use format::{AudioChunk, AudioFormat};
