//! Null PCM: accepts any configuration, discards playback and captures silence

use crate::error::Result;
use crate::pcm::area::{areas_silence, Areas, AreasMut};
use crate::pcm::mode::OpenMode;
use crate::pcm::{Pcm, PcmSetup, Stream, TstampType};
use crate::plugins::leaf::{LeafBackend, LeafPcm};

#[derive(Debug, Default)]
pub struct NullBackend;

impl LeafBackend for NullBackend {
    fn type_name(&self) -> &'static str {
        "null"
    }

    fn consume(
        &mut self,
        _setup: &PcmSetup,
        _areas: &Areas<'_>,
        _offset: usize,
        frames: usize,
    ) -> Result<usize> {
        Ok(frames)
    }

    fn produce(
        &mut self,
        setup: &PcmSetup,
        areas: &mut AreasMut<'_>,
        offset: usize,
        frames: usize,
    ) -> Result<usize> {
        areas_silence(areas, offset, setup.channels as usize, frames, setup.format);
        Ok(frames)
    }
}

/// Open a null PCM
pub fn open(name: &str, stream: Stream, mode: OpenMode) -> Result<Pcm> {
    LeafPcm::open(name, stream, mode, NullBackend, TstampType::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::format::Format;
    use crate::pcm::params::{Access, HwParams};
    use crate::pcm::State;

    fn configure(pcm: &mut Pcm) {
        let mut params = HwParams::any();
        params.set_access(Access::RwInterleaved).unwrap();
        params.set_format(Format::S16Le).unwrap();
        params.set_channels(2).unwrap();
        params.set_rate(48000).unwrap();
        params.set_period_size(64).unwrap();
        params.set_periods(4).unwrap();
        pcm.hw_params(&mut params).unwrap();
    }

    #[test]
    fn test_null_playback_discards() {
        let mut pcm = open("null", Stream::Playback, OpenMode::BLOCK).unwrap();
        configure(&mut pcm);
        assert_eq!(pcm.state(), State::Prepared);

        let buf = vec![0x11u8; 1000 * 4];
        assert_eq!(pcm.writei(&buf, 1000).unwrap(), 1000);
        assert_eq!(pcm.state(), State::Running);
        assert_eq!(pcm.avail_update().unwrap(), 256);
    }

    #[test]
    fn test_null_capture_silence() {
        let mut pcm = open("null", Stream::Capture, OpenMode::BLOCK).unwrap();
        configure(&mut pcm);

        let mut buf = vec![0xaau8; 100 * 4];
        assert_eq!(pcm.readi(&mut buf, 100).unwrap(), 100);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_null_poll_descriptor_allocated() {
        let a = open("a", Stream::Playback, OpenMode::BLOCK).unwrap();
        let b = open("b", Stream::Capture, OpenMode::BLOCK).unwrap();
        assert!(a.poll_descriptor().fd >= 0);
        assert_ne!(a.poll_descriptor().fd, b.poll_descriptor().fd);
        assert_ne!(a.poll_descriptor().events, b.poll_descriptor().events);
    }
}
