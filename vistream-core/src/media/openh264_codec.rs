//! OpenH264 backend.
//!
//! OpenH264 emits SPS/PPS in-band with every IDR rather than through a
//! separate header call, so `start` primes the encoder with one blank
//! frame and keeps that frame's parameter sets as extradata. The next
//! real frame is forced intra so the stream still opens on an IDR.
//!
//! The library is configured for screen content in real time with
//! frame skipping off; it never produces B-frames.

use openh264::OpenH264API;
use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate, FrameType, UsageType};
use openh264::formats::{BgraSliceU8, YUVBuffer};
use tracing::{debug, trace};

use crate::error::VistreamError;
use crate::media::encoder::{Codec, CodecOutput, CodecProvider, CodecSettings, CodecTier};
use crate::media::h264::{AnnexBUnits, NaluType};
use crate::media::types::RawFrame;

// ── Provider ─────────────────────────────────────────────────────

/// Registers the bundled OpenH264 build.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenH264Provider;

impl CodecProvider for OpenH264Provider {
    fn name(&self) -> &'static str {
        "openh264"
    }

    fn tier(&self) -> CodecTier {
        CodecTier::Alternate
    }

    fn create(&self) -> Option<Box<dyn Codec>> {
        Some(Box::new(OpenH264Codec::default()))
    }
}

// ── Codec ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct OpenH264Codec {
    encoder: Option<Encoder>,
    extradata: Vec<u8>,
    size: (usize, usize),
}

impl OpenH264Codec {
    fn encode_bgra(
        encoder: &mut Encoder,
        data: &[u8],
        size: (usize, usize),
    ) -> Result<(Vec<u8>, bool), VistreamError> {
        let yuv = YUVBuffer::from_rgb_source(BgraSliceU8::new(data, size));
        let bitstream = encoder
            .encode(&yuv)
            .map_err(|e| VistreamError::Encode(format!("openh264: {e:?}")))?;
        let keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        Ok((bitstream.to_vec(), keyframe))
    }
}

impl Codec for OpenH264Codec {
    fn start(&mut self, settings: &CodecSettings) -> Result<(), VistreamError> {
        let config = EncoderConfig::new()
            .bitrate(BitRate::from_bps(settings.bitrate_bps))
            .max_frame_rate(FrameRate::from_hz(settings.fps as f32))
            .skip_frames(false)
            .scene_change_detect(false)
            .usage_type(UsageType::ScreenContentRealTime);

        let mut encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| VistreamError::Configuration(format!("openh264 init failed: {e:?}")))?;

        let size = (settings.width as usize, settings.height as usize);
        let blank = vec![0u8; size.0 * size.1 * 4];
        let (primer, _) = Self::encode_bgra(&mut encoder, &blank, size)?;

        let mut extradata = Vec::new();
        for unit in AnnexBUnits::new(&primer) {
            if NaluType::of(unit).is_some_and(|t| t.is_parameter_set()) {
                extradata.extend_from_slice(&[0, 0, 0, 1]);
                extradata.extend_from_slice(unit);
            }
        }
        debug!(
            extradata_len = extradata.len(),
            primer_len = primer.len(),
            "openh264 primed"
        );

        encoder.force_intra_frame();
        self.encoder = Some(encoder);
        self.extradata = extradata;
        self.size = size;
        Ok(())
    }

    fn encode(
        &mut self,
        frame: &RawFrame,
        force_keyframe: bool,
    ) -> Result<Option<CodecOutput>, VistreamError> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or(VistreamError::InvalidState("not started"))?;

        if force_keyframe {
            encoder.force_intra_frame();
        }
        let (annex_b, keyframe) = Self::encode_bgra(encoder, &frame.data, self.size)?;
        if annex_b.is_empty() {
            trace!("openh264 produced no output");
            return Ok(None);
        }
        Ok(Some(CodecOutput { annex_b, keyframe }))
    }

    fn flush(&mut self) -> Result<Vec<CodecOutput>, VistreamError> {
        // No lookahead without B-frames: every encode call already
        // returned its access unit.
        self.encoder = None;
        Ok(Vec::new())
    }

    fn extradata(&self) -> &[u8] {
        &self.extradata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CodecSettings {
        CodecSettings {
            width: 64,
            height: 48,
            fps: 20,
            bitrate_bps: 500_000,
            keyframe_interval: 40,
        }
    }

    #[test]
    fn primed_extradata_carries_parameter_sets() {
        let mut codec = OpenH264Codec::default();
        codec.start(&settings()).unwrap();
        let types: Vec<_> = AnnexBUnits::new(codec.extradata())
            .filter_map(NaluType::of)
            .collect();
        assert!(types.contains(&NaluType::Sps));
        assert!(types.contains(&NaluType::Pps));
    }

    #[test]
    fn first_frame_after_start_is_intra() {
        let mut codec = OpenH264Codec::default();
        codec.start(&settings()).unwrap();
        let out = codec
            .encode(&RawFrame::blank(64, 48), false)
            .unwrap()
            .unwrap();
        assert!(out.keyframe);
    }

    #[test]
    fn encode_after_flush_fails() {
        let mut codec = OpenH264Codec::default();
        codec.start(&settings()).unwrap();
        assert!(codec.flush().unwrap().is_empty());
        assert!(codec.encode(&RawFrame::blank(64, 48), false).is_err());
    }
}
