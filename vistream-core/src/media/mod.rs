//! Media pipeline: raw frames in, AVCC access units out.
//!
//! | Module           | Purpose                                          |
//! |------------------|--------------------------------------------------|
//! | `types`          | Raw BGRA frame buffer shared with surfaces        |
//! | `h264`           | Annex-B parsing, reframing, decoder config record |
//! | `encoder`        | Codec capability, backend catalog, encoder state  |
//! | `openh264_codec` | OpenH264 backend (`h264` feature)                 |

pub mod encoder;
pub mod h264;
#[cfg(feature = "h264")]
pub mod openh264_codec;
pub mod types;

// ── Re-exports ───────────────────────────────────────────────────

pub use encoder::{
    Codec, CodecCatalog, CodecOutput, CodecProvider, CodecSettings, CodecTier, EncodedPacket,
    EncoderState, H264Encoder,
};
pub use h264::{DecoderConfig, NaluType, annex_b_to_length_prefixed};
#[cfg(feature = "h264")]
pub use openh264_codec::OpenH264Provider;
pub use types::{PixelFormat, RawFrame};
