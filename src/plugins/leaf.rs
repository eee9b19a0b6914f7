//! Leaf PCM devices
//!
//! A leaf owns its ring buffer and talks to a [`LeafBackend`] that plays
//! or captures the frames. Playback frames are handed to the backend as
//! soon as the device runs; capture frames are requested from the backend
//! whenever the application asks what is available.

use std::fmt;

use crate::error::{Error, Result};
use crate::pcm::area::{Areas, AreasMut, FrameBuffer};
use crate::pcm::chmap::{ChannelMap, ChmapType, QueriedChmap};
use crate::pcm::mode::OpenMode;
use crate::pcm::ops::PcmOps;
use crate::pcm::params::{HwParams, Interval, ParamKind, ParamMask};
use crate::pcm::{
    ChannelInfo, MmapRegion, Pcm, PcmCommon, PcmIdentity, PcmSetup, PollDescriptor, State,
    Stream, SwParams, TstampType,
};

/// Hardware side of a leaf device
pub trait LeafBackend: Send {
    fn type_name(&self) -> &'static str;

    /// Narrow the generic leaf capabilities to what the backend supports
    fn restrict(&self, _caps: &mut HwParams) -> Result<()> {
        Ok(())
    }

    fn configure(&mut self, _setup: &PcmSetup) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) {}

    /// Release everything acquired by `configure`
    fn release(&mut self) {}

    /// Take up to `frames` playback frames at `offset`; returns the frames taken
    fn consume(
        &mut self,
        setup: &PcmSetup,
        areas: &Areas<'_>,
        offset: usize,
        frames: usize,
    ) -> Result<usize>;

    /// Store up to `frames` captured frames at `offset`; returns the frames stored
    fn produce(
        &mut self,
        setup: &PcmSetup,
        areas: &mut AreasMut<'_>,
        offset: usize,
        frames: usize,
    ) -> Result<usize>;

    /// Block until the backend can make progress; `false` on timeout
    fn wait(&mut self, _timeout_ms: i32) -> Result<bool> {
        Ok(true)
    }

    fn describe(&self, _out: &mut dyn fmt::Write) -> fmt::Result {
        Ok(())
    }
}

/// Capabilities every leaf starts from
pub fn default_caps() -> HwParams {
    let mut caps = HwParams::any();
    let limits = [
        (ParamKind::BufferSize, Interval::new(16, 1 << 20)),
        (ParamKind::PeriodSize, Interval::new(8, 1 << 19)),
        (ParamKind::Periods, Interval::new(2, 1024)),
        (ParamKind::Rate, Interval::new(4000, 768_000)),
        (ParamKind::Channels, Interval::new(1, 256)),
    ];
    for (kind, interval) in limits {
        // Every limit is non-empty and lies inside `any()`
        let _ = caps.refine_interval(kind, &interval);
    }
    caps
}

/// Ring-buffered device driven by a backend
pub struct LeafPcm<B: LeafBackend> {
    backend: B,
    caps: HwParams,
    ring: FrameBuffer,
    chmap: Option<ChannelMap>,
}

impl<B: LeafBackend + 'static> LeafPcm<B> {
    pub fn new(backend: B) -> Result<Self> {
        let mut caps = default_caps();
        backend.restrict(&mut caps)?;
        caps.refine_soft()?;
        Ok(Self {
            backend,
            caps,
            ring: FrameBuffer::default(),
            chmap: None,
        })
    }

    /// Open a leaf PCM around `backend`
    pub fn open(
        name: &str,
        stream: Stream,
        mode: OpenMode,
        backend: B,
        tstamp_type: TstampType,
    ) -> Result<Pcm> {
        let leaf = Self::new(backend)?;
        let mut common = PcmCommon::new(name, stream, mode);
        common.poll = PollDescriptor::allocate(stream);
        common.tstamp_type = tstamp_type;
        tracing::debug!(pcm = name, kind = leaf.backend.type_name(), %stream, "opened leaf");
        Ok(Pcm::new(common, Box::new(leaf)))
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Hand pending playback frames to the backend
    fn pump(&mut self, common: &mut PcmCommon) -> Result<()> {
        let setup = common.require_setup()?;
        let buffer = self.ring.frames();
        let mut pending = common.queued();
        while pending > 0 {
            let offset = common.link.hw().get().max(0) as usize % buffer;
            let chunk = pending.min(buffer - offset);
            let taken = self
                .backend
                .consume(&setup, &self.ring.areas(), offset, chunk)?;
            common.link.hw().advance(taken);
            pending -= taken;
            if taken < chunk {
                break;
            }
        }
        Ok(())
    }

    /// Ask the backend for captured frames until the ring is full
    fn fill(&mut self, common: &mut PcmCommon) -> Result<()> {
        let setup = common.require_setup()?;
        let buffer = self.ring.frames();
        loop {
            let space = buffer - common.queued().min(buffer);
            if space == 0 {
                break;
            }
            let offset = common.link.hw().get().max(0) as usize % buffer;
            let chunk = space.min(buffer - offset);
            let stored = self
                .backend
                .produce(&setup, &mut self.ring.areas_mut(), offset, chunk)?;
            common.link.hw().advance(stored);
            if stored < chunk {
                break;
            }
        }
        Ok(())
    }
}

impl<B: LeafBackend + 'static> PcmOps for LeafPcm<B> {
    fn type_name(&self) -> &'static str {
        self.backend.type_name()
    }

    fn close(&mut self, _common: &mut PcmCommon) -> Result<()> {
        self.backend.stop();
        self.backend.release();
        Ok(())
    }

    fn info(&mut self, common: &PcmCommon) -> Result<PcmIdentity> {
        Ok(PcmIdentity {
            card: -1,
            device: 0,
            subdevice: 0,
            id: self.backend.type_name().to_string(),
            name: common.name.clone(),
            stream: common.stream,
        })
    }

    fn hw_refine(&mut self, _common: &mut PcmCommon, params: &mut HwParams) -> Result<()> {
        params.refine_from(&self.caps, ParamMask::ALL)?;
        params.refine_soft()?;
        Ok(())
    }

    fn hw_params(&mut self, _common: &mut PcmCommon, params: &mut HwParams) -> Result<()> {
        let setup = PcmSetup::from_params(params)?;
        self.backend.stop();
        self.ring = FrameBuffer::allocate(&setup)?;
        self.backend.configure(&setup)?;
        if matches!(&self.chmap, Some(map) if map.channels() != setup.channels as usize) {
            self.chmap = None;
        }
        Ok(())
    }

    fn hw_free(&mut self, _common: &mut PcmCommon) -> Result<()> {
        self.backend.stop();
        self.backend.release();
        self.ring = FrameBuffer::default();
        Ok(())
    }

    fn sw_params(&mut self, _common: &mut PcmCommon, _params: &SwParams) -> Result<()> {
        Ok(())
    }

    fn channel_info(&mut self, common: &PcmCommon, channel: u32) -> Result<ChannelInfo> {
        common.require_setup()?;
        let area = self.ring.layout().get(channel as usize).ok_or_else(|| {
            Error::InvalidArgument(format!("channel {} out of range", channel))
        })?;
        Ok(ChannelInfo {
            channel,
            first: area.first,
            step: area.step,
        })
    }

    fn dump(&mut self, common: &PcmCommon, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{} PCM {}", self.backend.type_name(), common.name)?;
        self.backend.describe(out)?;
        Pcm::dump_setup(common, out)
    }

    fn nonblock(&mut self, _common: &mut PcmCommon, _nonblock: bool) -> Result<()> {
        Ok(())
    }

    fn async_mode(&mut self, _common: &mut PcmCommon, _enable: bool) -> Result<()> {
        Ok(())
    }

    fn mmap(&mut self, _common: &mut PcmCommon) -> Result<()> {
        Ok(())
    }

    fn munmap(&mut self, _common: &mut PcmCommon) -> Result<()> {
        Ok(())
    }

    fn query_chmaps(&mut self, _common: &PcmCommon) -> Result<Vec<QueriedChmap>> {
        let channels = self.caps.interval(ParamKind::Channels);
        Ok([1, 2, 4, 6, 8]
            .into_iter()
            .filter(|n| channels.contains(*n))
            .filter_map(ChannelMap::standard)
            .map(|map| QueriedChmap {
                kind: ChmapType::Fixed,
                map,
            })
            .collect())
    }

    fn get_chmap(&mut self, common: &PcmCommon) -> Result<ChannelMap> {
        let setup = common.require_setup()?;
        self.chmap
            .clone()
            .or_else(|| ChannelMap::standard(setup.channels))
            .ok_or_else(|| Error::NotSupported(format!("{} channel map", common.name)))
    }

    fn set_chmap(&mut self, common: &mut PcmCommon, map: &ChannelMap) -> Result<()> {
        let setup = common.require_setup()?;
        if map.channels() != setup.channels as usize {
            return Err(Error::InvalidArgument(format!(
                "channel map has {} positions, device has {} channels",
                map.channels(),
                setup.channels
            )));
        }
        self.chmap = Some(map.clone());
        Ok(())
    }

    fn prepare(&mut self, common: &mut PcmCommon) -> Result<()> {
        let setup = common.require_setup()?;
        self.backend.stop();
        common.link.start_own();
        self.ring.silence(setup.format);
        Ok(())
    }

    fn start(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.backend.start()?;
        match common.stream {
            Stream::Playback => self.pump(common),
            Stream::Capture => Ok(()),
        }
    }

    fn drop_frames(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.backend.stop();
        let appl = common.link.appl().get();
        common.link.hw().set(appl);
        Ok(())
    }

    fn drain(&mut self, common: &mut PcmCommon) -> Result<()> {
        if common.stream == Stream::Playback {
            loop {
                self.pump(common)?;
                if common.queued() == 0 {
                    break;
                }
                if !self.backend.wait(1000)? {
                    tracing::warn!("Drain of {} timed out", common.name);
                    break;
                }
            }
        }
        self.backend.stop();
        Ok(())
    }

    fn avail_update(&mut self, common: &mut PcmCommon) -> Result<usize> {
        common.require_setup()?;
        let buffer = self.ring.frames();
        let running = common.state == State::Running;
        match common.stream {
            Stream::Playback => {
                if running {
                    self.pump(common)?;
                }
                Ok(buffer - common.queued().min(buffer))
            }
            Stream::Capture => {
                if running {
                    self.fill(common)?;
                }
                Ok(common.queued().min(buffer))
            }
        }
    }

    fn wait(&mut self, _common: &mut PcmCommon, timeout_ms: i32) -> Result<bool> {
        self.backend.wait(timeout_ms)
    }

    fn mmap_begin(&mut self, common: &PcmCommon, frames: usize) -> Result<MmapRegion<'_>> {
        common.require_setup()?;
        let buffer = self.ring.frames();
        let offset = common.link.appl().get().max(0) as usize % buffer;
        Ok(MmapRegion {
            frames: frames.min(buffer - offset),
            offset,
            areas: self.ring.areas_mut(),
        })
    }

    fn mmap_commit(
        &mut self,
        common: &mut PcmCommon,
        _offset: usize,
        frames: usize,
    ) -> Result<usize> {
        common.link.appl().advance(frames);
        if common.stream == Stream::Playback && common.state == State::Running {
            self.pump(common)?;
        }
        Ok(frames)
    }
}
