//! Buffer PCM: a memory-backed device with configurable capabilities
//!
//! Playback frames end up in a [`Tap`] the host can inspect; capture
//! replays whatever was preloaded into the tap, then silence. The
//! restrictions (`formats`, `access`, `channels`, `rate`, `tstamp`) make
//! it stand in for real hardware with a narrower parameter space.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

use crate::config::PcmDefinition;
use crate::error::Result;
use crate::pcm::area::{areas_copy, areas_silence, Areas, AreasMut};
use crate::pcm::format::Format;
use crate::pcm::mode::OpenMode;
use crate::pcm::params::{Access, HwParams, Interval, Mask, ParamKind};
use crate::pcm::{Pcm, PcmSetup, Stream, TstampType};
use crate::plugins::leaf::{LeafBackend, LeafPcm};

#[derive(Debug, Default)]
struct TapInner {
    /// Interleaved playback frames in the committed format
    recorded: Vec<u8>,
    /// Interleaved frames served to capture
    source: Vec<u8>,
    source_pos: usize,
    format: Option<Format>,
    channels: u32,
    configured: usize,
}

/// Shared view of what a buffer device played or will capture
#[derive(Debug, Clone, Default)]
pub struct Tap(Arc<Mutex<TapInner>>);

impl Tap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes played so far
    pub fn recorded(&self) -> Vec<u8> {
        self.0.lock().recorded.clone()
    }

    /// Frames played so far
    pub fn frames_recorded(&self) -> usize {
        let inner = self.0.lock();
        match inner.format {
            Some(format) if inner.channels > 0 => {
                inner.recorded.len() / (format.bytes() * inner.channels as usize)
            }
            _ => 0,
        }
    }

    /// Format of the last committed setup
    pub fn format(&self) -> Option<Format> {
        self.0.lock().format
    }

    /// Number of times the device was configured
    pub fn configured(&self) -> usize {
        self.0.lock().configured
    }

    /// Interleaved frames capture will return
    pub fn preload(&self, bytes: &[u8]) {
        let mut inner = self.0.lock();
        inner.source = bytes.to_vec();
        inner.source_pos = 0;
    }

    pub fn clear(&self) {
        let mut inner = self.0.lock();
        inner.recorded.clear();
        inner.source_pos = 0;
    }
}

/// Capability restrictions of a buffer device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferCaps {
    pub formats: Option<Vec<Format>>,
    pub access: Option<Vec<Access>>,
    pub channels: Option<Interval>,
    pub rate: Option<Interval>,
    pub tstamp: TstampType,
}

impl BufferCaps {
    pub const FIELDS: [&'static str; 5] = ["formats", "access", "channels", "rate", "tstamp"];

    pub fn with_formats(mut self, formats: &[Format]) -> Self {
        self.formats = Some(formats.to_vec());
        self
    }

    pub fn with_rate(mut self, rate: Interval) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_channels(mut self, channels: Interval) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Read restrictions from a `type = "buffer"` definition
    pub fn from_definition(def: &PcmDefinition<'_>) -> Result<Self> {
        def.check_fields(&Self::FIELDS)?;
        let formats = def
            .get_str_list("formats")?
            .map(|names| names.iter().map(|n| n.parse()).collect::<Result<Vec<Format>>>())
            .transpose()?;
        let access = def
            .get_str_list("access")?
            .map(|names| names.iter().map(|n| n.parse()).collect::<Result<Vec<Access>>>())
            .transpose()?;
        let tstamp = def
            .get_str("tstamp")?
            .map(str::parse)
            .transpose()?
            .unwrap_or_default();
        Ok(Self {
            formats,
            access,
            channels: def.get_range("channels")?,
            rate: def.get_range("rate")?,
            tstamp,
        })
    }
}

pub struct BufferBackend {
    caps: BufferCaps,
    tap: Tap,
}

impl BufferBackend {
    pub fn new(caps: BufferCaps, tap: Tap) -> Self {
        Self { caps, tap }
    }
}

impl LeafBackend for BufferBackend {
    fn type_name(&self) -> &'static str {
        "buffer"
    }

    fn restrict(&self, caps: &mut HwParams) -> Result<()> {
        if let Some(formats) = &self.caps.formats {
            caps.refine_mask(ParamKind::Format, &Mask::formats(formats))?;
        }
        if let Some(access) = &self.caps.access {
            let bits: Vec<u32> = access.iter().map(|a| *a as u32).collect();
            caps.refine_mask(ParamKind::Access, &Mask::from_bits(&bits))?;
        }
        if let Some(channels) = &self.caps.channels {
            caps.refine_interval(ParamKind::Channels, channels)?;
        }
        if let Some(rate) = &self.caps.rate {
            caps.refine_interval(ParamKind::Rate, rate)?;
        }
        Ok(())
    }

    fn configure(&mut self, setup: &PcmSetup) -> Result<()> {
        let mut inner = self.tap.0.lock();
        if inner.format != Some(setup.format) || inner.channels != setup.channels {
            inner.recorded.clear();
        }
        inner.format = Some(setup.format);
        inner.channels = setup.channels;
        inner.configured += 1;
        Ok(())
    }

    fn consume(
        &mut self,
        setup: &PcmSetup,
        areas: &Areas<'_>,
        offset: usize,
        frames: usize,
    ) -> Result<usize> {
        let channels = setup.channels as usize;
        let mut chunk = vec![0u8; frames * setup.frame_bytes()];
        {
            let mut dst = AreasMut::interleaved(&mut chunk, channels, setup.format);
            areas_copy(&mut dst, 0, areas, offset, channels, frames, setup.format);
        }
        self.tap.0.lock().recorded.extend_from_slice(&chunk);
        Ok(frames)
    }

    fn produce(
        &mut self,
        setup: &PcmSetup,
        areas: &mut AreasMut<'_>,
        offset: usize,
        frames: usize,
    ) -> Result<usize> {
        let channels = setup.channels as usize;
        let frame_bytes = setup.frame_bytes();
        let mut inner = self.tap.0.lock();
        let remaining = (inner.source.len() - inner.source_pos.min(inner.source.len())) / frame_bytes;
        let from_source = remaining.min(frames);
        if from_source > 0 {
            let start = inner.source_pos;
            let src_bytes = &inner.source[start..start + from_source * frame_bytes];
            let src = Areas::interleaved(src_bytes, channels, setup.format);
            areas_copy(areas, offset, &src, 0, channels, from_source, setup.format);
            inner.source_pos += from_source * frame_bytes;
        }
        areas_silence(
            areas,
            offset + from_source,
            channels,
            frames - from_source,
            setup.format,
        );
        Ok(frames)
    }

    fn describe(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        if let Some(formats) = &self.caps.formats {
            let names: Vec<&str> = formats.iter().map(|f| f.name()).collect();
            writeln!(out, "  formats      : {}", names.join(" "))?;
        }
        Ok(())
    }
}

/// Open a buffer PCM recording into `tap`
pub fn open(name: &str, stream: Stream, mode: OpenMode, caps: BufferCaps, tap: Tap) -> Result<Pcm> {
    let tstamp = caps.tstamp;
    LeafPcm::open(name, stream, mode, BufferBackend::new(caps, tap), tstamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn s16_params(rate: u32) -> HwParams {
        let mut params = HwParams::any();
        params.set_access(Access::RwInterleaved).unwrap();
        params.set_format(Format::S16Le).unwrap();
        params.set_channels(2).unwrap();
        params.set_rate(rate).unwrap();
        params.set_period_size(32).unwrap();
        params.set_periods(2).unwrap();
        params
    }

    #[test]
    fn test_tap_records_playback() {
        let tap = Tap::new();
        let mut pcm = open("hw", Stream::Playback, OpenMode::BLOCK, BufferCaps::default(), tap.clone())
            .unwrap();
        pcm.hw_params(&mut s16_params(48000)).unwrap();

        let data: Vec<u8> = (0..40u8).collect();
        assert_eq!(pcm.writei(&data, 10).unwrap(), 10);
        assert_eq!(tap.recorded(), data);
        assert_eq!(tap.frames_recorded(), 10);
        assert_eq!(tap.format(), Some(Format::S16Le));
    }

    #[test]
    fn test_caps_restrict_rate() {
        let caps = BufferCaps::default().with_rate(Interval::new(8000, 16000));
        let mut pcm = open("hw", Stream::Playback, OpenMode::BLOCK, caps, Tap::new()).unwrap();
        let err = pcm.hw_params(&mut s16_params(48000)).unwrap_err();
        assert!(matches!(err, Error::IncompatibleParams(ParamKind::Rate)));
    }

    #[test]
    fn test_capture_replays_preload() {
        let tap = Tap::new();
        let source: Vec<u8> = (1..=16u8).collect();
        tap.preload(&source);
        let mut pcm = open("hw", Stream::Capture, OpenMode::BLOCK, BufferCaps::default(), tap)
            .unwrap();
        pcm.hw_params(&mut s16_params(48000)).unwrap();

        let mut buf = vec![0xffu8; 24];
        assert_eq!(pcm.readi(&mut buf, 6).unwrap(), 6);
        assert_eq!(&buf[..16], &source[..]);
        assert_eq!(&buf[16..], &[0u8; 8]);
    }

    #[test]
    fn test_caps_from_definition() {
        let config: crate::config::Config =
            "[pcm.hw]\ntype = \"buffer\"\nformats = [\"S16_LE\", \"S24_3LE\"]\nrate = 44100\n"
                .parse()
                .unwrap();
        let caps = BufferCaps::from_definition(&config.pcm("hw").unwrap()).unwrap();
        assert_eq!(caps.formats, Some(vec![Format::S16Le, Format::S24_3Le]));
        assert_eq!(caps.rate, Some(Interval::single(44100)));
    }
}
