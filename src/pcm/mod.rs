//! PCM devices
//!
//! A [`Pcm`] is the application-facing endpoint: shared state in
//! [`PcmCommon`] plus a boxed [`PcmOps`] implementation that is either a
//! leaf device or a plugin stacked on a slave PCM. The generic transfer
//! loops live here; devices only provide `avail_update` and the
//! `mmap_begin`/`mmap_commit` pair.

pub mod area;
pub mod chmap;
pub mod format;
pub mod mode;
pub mod ops;
pub mod params;
pub mod plugin;
pub mod position;
pub mod refine;
pub mod slave;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use area::{areas_copy, Areas, AreasMut};
use chmap::{ChannelMap, QueriedChmap};
use format::Format;
use mode::OpenMode;
use ops::PcmOps;
use params::{Access, HwParams};
use position::PositionLink;

pub use area::ChannelArea;

/// Direction of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stream {
    Playback,
    Capture,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Playback => f.write_str("PLAYBACK"),
            Stream::Capture => f.write_str("CAPTURE"),
        }
    }
}

/// PCM state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    Open,
    Setup,
    Prepared,
    Running,
    Xrun,
    Draining,
}

/// Timestamp source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TstampType {
    #[default]
    Gettimeofday,
    Monotonic,
    MonotonicRaw,
}

impl std::str::FromStr for TstampType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gettimeofday" | "default" => Ok(TstampType::Gettimeofday),
            "monotonic" => Ok(TstampType::Monotonic),
            "monotonic_raw" => Ok(TstampType::MonotonicRaw),
            _ => Err(Error::InvalidArgument(format!("unknown timestamp type {}", s))),
        }
    }
}

/// Poll events a descriptor signals readiness with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollEvents(pub u16);

impl PollEvents {
    pub const IN: PollEvents = PollEvents(0x0001);
    pub const OUT: PollEvents = PollEvents(0x0004);
    pub const ERR: PollEvents = PollEvents(0x0008);

    /// Readiness events for a stream direction
    pub fn for_stream(stream: Stream) -> Self {
        match stream {
            Stream::Playback => PollEvents(Self::OUT.0 | Self::ERR.0),
            Stream::Capture => PollEvents(Self::IN.0 | Self::ERR.0),
        }
    }
}

/// Descriptor the application waits on; plugins expose their slave's
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollDescriptor {
    pub fd: i32,
    pub events: PollEvents,
}

static NEXT_POLL_FD: AtomicI32 = AtomicI32::new(1000);

impl PollDescriptor {
    /// No descriptor yet
    pub fn none() -> Self {
        Self {
            fd: -1,
            events: PollEvents(0),
        }
    }

    /// Allocate a process-unique descriptor for a leaf device
    pub fn allocate(stream: Stream) -> Self {
        Self {
            fd: NEXT_POLL_FD.fetch_add(1, Ordering::Relaxed),
            events: PollEvents::for_stream(stream),
        }
    }
}

/// Committed hardware configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmSetup {
    pub access: Access,
    pub format: Format,
    pub channels: u32,
    pub rate: u32,
    pub period_size: u32,
    pub periods: u32,
    pub buffer_size: u32,
    pub sample_bits: u32,
    pub frame_bits: u32,
}

impl PcmSetup {
    /// Extract the single values of a fully refined parameter set
    pub fn from_params(params: &HwParams) -> Result<Self> {
        use params::ParamKind;
        Ok(Self {
            access: params.access()?,
            format: params.format()?,
            channels: params.channels()?,
            rate: params.rate()?,
            period_size: params.period_size()?,
            periods: params.value(ParamKind::Periods)?,
            buffer_size: params.buffer_size()?,
            sample_bits: params.value(ParamKind::SampleBits)?,
            frame_bits: params.value(ParamKind::FrameBits)?,
        })
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bits as usize / 8
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buffer_size as usize * self.frame_bytes()
    }
}

impl fmt::Display for PcmSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  access       : {}", self.access)?;
        writeln!(f, "  format       : {}", self.format)?;
        writeln!(f, "  channels     : {}", self.channels)?;
        writeln!(f, "  rate         : {}", self.rate)?;
        writeln!(f, "  sample_bits  : {}", self.sample_bits)?;
        writeln!(f, "  frame_bits   : {}", self.frame_bits)?;
        writeln!(f, "  period_size  : {}", self.period_size)?;
        writeln!(f, "  periods      : {}", self.periods)?;
        writeln!(f, "  buffer_size  : {}", self.buffer_size)
    }
}

/// Software parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwParams {
    pub avail_min: u32,
    pub start_threshold: u32,
    pub stop_threshold: u32,
}

impl SwParams {
    /// Defaults installed after a successful `hw_params`
    pub fn defaults_for(setup: &PcmSetup) -> Self {
        Self {
            avail_min: setup.period_size,
            start_threshold: 1,
            stop_threshold: setup.buffer_size,
        }
    }
}

/// Identification of a PCM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmIdentity {
    pub card: i32,
    pub device: u32,
    pub subdevice: u32,
    pub id: String,
    pub name: String,
    pub stream: Stream,
}

/// Location of one channel inside the mapped buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel: u32,
    /// Bit offset of the first sample
    pub first: usize,
    /// Bit distance between samples
    pub step: usize,
}

/// State every PCM carries regardless of its implementation
#[derive(Debug)]
pub struct PcmCommon {
    pub name: String,
    pub stream: Stream,
    pub mode: OpenMode,
    pub state: State,
    pub setup: Option<PcmSetup>,
    pub hw_params: Option<HwParams>,
    pub sw_params: SwParams,
    pub poll: PollDescriptor,
    pub tstamp_type: TstampType,
    pub link: PositionLink,
}

impl PcmCommon {
    pub fn new(name: &str, stream: Stream, mode: OpenMode) -> Self {
        Self {
            name: name.to_string(),
            stream,
            mode,
            state: State::Open,
            setup: None,
            hw_params: None,
            sw_params: SwParams::default(),
            poll: PollDescriptor::none(),
            tstamp_type: TstampType::default(),
            link: PositionLink::new(),
        }
    }

    /// Committed setup, or `BadState` before `hw_params`
    pub fn require_setup(&self) -> Result<PcmSetup> {
        self.setup
            .ok_or_else(|| Error::BadState(format!("{} is not set up", self.name)))
    }

    /// Frames between the application and hardware counters: pending
    /// playback frames, or captured frames not yet read
    pub fn queued(&self) -> usize {
        let appl = self.link.appl().get().max(0);
        let hw = self.link.hw().get().max(0);
        (appl - hw).unsigned_abs() as usize
    }
}

/// Memory-mapped window into a PCM's buffer
pub struct MmapRegion<'a> {
    pub areas: AreasMut<'a>,
    /// Frame offset of the window inside the buffer
    pub offset: usize,
    /// Contiguous frames available at `offset`
    pub frames: usize,
}

/// PCM shared between threads; the mutex serializes every call
pub type SharedPcm = Arc<Mutex<Pcm>>;

/// Application-facing PCM handle
pub struct Pcm {
    common: PcmCommon,
    ops: Box<dyn PcmOps>,
    closed: bool,
}

impl fmt::Debug for Pcm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pcm")
            .field("name", &self.common.name)
            .field("type", &self.ops.type_name())
            .field("stream", &self.common.stream)
            .field("state", &self.common.state)
            .finish()
    }
}

impl Pcm {
    pub fn new(common: PcmCommon, ops: Box<dyn PcmOps>) -> Self {
        Self {
            common,
            ops,
            closed: false,
        }
    }

    /// Wrap into a handle shareable between threads
    pub fn into_shared(self) -> SharedPcm {
        Arc::new(Mutex::new(self))
    }

    pub fn name(&self) -> &str {
        &self.common.name
    }

    pub fn type_name(&self) -> &'static str {
        self.ops.type_name()
    }

    pub fn stream(&self) -> Stream {
        self.common.stream
    }

    pub fn mode(&self) -> OpenMode {
        self.common.mode
    }

    pub fn state(&self) -> State {
        self.common.state
    }

    pub fn setup(&self) -> Option<&PcmSetup> {
        self.common.setup.as_ref()
    }

    pub fn sw_params_current(&self) -> SwParams {
        self.common.sw_params
    }

    pub fn poll_descriptor(&self) -> PollDescriptor {
        self.common.poll
    }

    pub fn tstamp_type(&self) -> TstampType {
        self.common.tstamp_type
    }

    pub fn position(&self) -> &PositionLink {
        &self.common.link
    }

    pub fn common(&self) -> &PcmCommon {
        &self.common
    }

    pub fn info(&mut self) -> Result<PcmIdentity> {
        self.ops.info(&self.common)
    }

    /// Narrow `params` to what this PCM can do
    pub fn hw_refine(&mut self, params: &mut HwParams) -> Result<()> {
        self.ops.hw_refine(&mut self.common, params)
    }

    /// Refine, install single values, commit and prepare
    pub fn hw_params(&mut self, params: &mut HwParams) -> Result<()> {
        if matches!(self.common.state, State::Running | State::Draining) {
            return Err(Error::BadState(format!(
                "{} cannot change hardware parameters while running",
                self.common.name
            )));
        }
        self.hw_refine(params)?;
        params.choose()?;
        self.hw_refine(params)?;
        if let Some(kind) = params.first_unresolved() {
            return Err(Error::Unresolved(kind));
        }
        self.ops.hw_params(&mut self.common, params)?;

        let setup = PcmSetup::from_params(params)?;
        tracing::debug!(pcm = %self.common.name, ?setup, "hardware parameters committed");
        self.common.sw_params = SwParams::defaults_for(&setup);
        self.common.setup = Some(setup);
        self.common.hw_params = Some(params.clone());
        self.common.state = State::Setup;
        self.prepare()
    }

    pub fn hw_free(&mut self) -> Result<()> {
        if matches!(self.common.state, State::Running | State::Draining) {
            self.drop_frames()?;
        }
        self.ops.hw_free(&mut self.common)?;
        self.common.setup = None;
        self.common.hw_params = None;
        self.common.state = State::Open;
        Ok(())
    }

    pub fn sw_params(&mut self, params: &SwParams) -> Result<()> {
        let setup = self.common.require_setup()?;
        if params.avail_min == 0 || params.avail_min > setup.buffer_size {
            return Err(Error::InvalidArgument(format!(
                "avail_min {} outside 1..={}",
                params.avail_min, setup.buffer_size
            )));
        }
        self.ops.sw_params(&mut self.common, params)?;
        self.common.sw_params = *params;
        Ok(())
    }

    pub fn channel_info(&mut self, channel: u32) -> Result<ChannelInfo> {
        self.ops.channel_info(&self.common, channel)
    }

    pub fn nonblock(&mut self, nonblock: bool) -> Result<()> {
        self.ops.nonblock(&mut self.common, nonblock)?;
        self.common.mode = self.common.mode.with(OpenMode::NONBLOCK, nonblock);
        Ok(())
    }

    pub fn async_mode(&mut self, enable: bool) -> Result<()> {
        self.ops.async_mode(&mut self.common, enable)?;
        self.common.mode = self.common.mode.with(OpenMode::ASYNC, enable);
        Ok(())
    }

    pub fn mmap(&mut self) -> Result<()> {
        self.ops.mmap(&mut self.common)
    }

    pub fn munmap(&mut self) -> Result<()> {
        self.ops.munmap(&mut self.common)
    }

    pub fn query_chmaps(&mut self) -> Result<Vec<QueriedChmap>> {
        self.ops.query_chmaps(&self.common)
    }

    pub fn get_chmap(&mut self) -> Result<ChannelMap> {
        self.ops.get_chmap(&self.common)
    }

    pub fn set_chmap(&mut self, map: &ChannelMap) -> Result<()> {
        self.ops.set_chmap(&mut self.common, map)
    }

    pub fn prepare(&mut self) -> Result<()> {
        self.common.require_setup()?;
        self.ops.prepare(&mut self.common)?;
        self.common.state = State::Prepared;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.common.state != State::Prepared {
            return Err(Error::BadState(format!(
                "{} cannot start from {:?}",
                self.common.name, self.common.state
            )));
        }
        self.ops.start(&mut self.common)?;
        self.common.state = State::Running;
        Ok(())
    }

    /// Stop immediately, discarding pending frames
    pub fn drop_frames(&mut self) -> Result<()> {
        self.common.require_setup()?;
        self.ops.drop_frames(&mut self.common)?;
        self.common.state = State::Setup;
        Ok(())
    }

    /// Stop after pending playback frames are consumed
    pub fn drain(&mut self) -> Result<()> {
        self.common.require_setup()?;
        if self.common.state == State::Prepared && self.common.stream == Stream::Playback {
            self.start()?;
        }
        self.common.state = State::Draining;
        let result = self.ops.drain(&mut self.common);
        self.common.state = State::Setup;
        result
    }

    /// Frames the application can transfer right now
    pub fn avail_update(&mut self) -> Result<usize> {
        self.ops.avail_update(&mut self.common)
    }

    /// Frames queued ahead of the hardware
    pub fn delay(&self) -> usize {
        self.common.queued()
    }

    pub fn wait(&mut self, timeout_ms: i32) -> Result<bool> {
        self.ops.wait(&mut self.common, timeout_ms)
    }

    pub fn mmap_begin(&mut self, frames: usize) -> Result<MmapRegion<'_>> {
        self.ops.mmap_begin(&self.common, frames)
    }

    pub fn mmap_commit(&mut self, offset: usize, frames: usize) -> Result<usize> {
        let committed = self.ops.mmap_commit(&mut self.common, offset, frames)?;
        self.maybe_autostart()?;
        Ok(committed)
    }

    fn maybe_autostart(&mut self) -> Result<()> {
        if self.common.state == State::Prepared
            && self.common.stream == Stream::Playback
            && self.common.queued() >= self.common.sw_params.start_threshold as usize
        {
            self.start()?;
        }
        Ok(())
    }

    fn check_transfer(&self, stream: Stream, interleaved: bool) -> Result<PcmSetup> {
        if self.common.stream != stream {
            return Err(Error::InvalidArgument(format!(
                "{} is a {} stream",
                self.common.name, self.common.stream
            )));
        }
        let setup = self.common.require_setup()?;
        if setup.access.is_interleaved() != interleaved {
            return Err(Error::InvalidArgument(format!(
                "{} access does not match the transfer call",
                setup.access
            )));
        }
        match self.common.state {
            State::Prepared | State::Running => Ok(setup),
            State::Xrun => Err(Error::Xrun),
            other => Err(Error::BadState(format!(
                "{} cannot transfer in {:?}",
                self.common.name, other
            ))),
        }
    }

    /// Write interleaved frames
    pub fn writei(&mut self, buf: &[u8], frames: usize) -> Result<usize> {
        let setup = self.check_transfer(Stream::Playback, true)?;
        if buf.len() < transfer_bytes(frames, setup.frame_bytes())? {
            return Err(Error::InvalidArgument("buffer shorter than frame count".into()));
        }
        let areas = Areas::interleaved(buf, setup.channels as usize, setup.format);
        self.write_areas(&setup, &areas, frames)
    }

    /// Write one buffer per channel
    pub fn writen(&mut self, bufs: &[&[u8]], frames: usize) -> Result<usize> {
        let setup = self.check_transfer(Stream::Playback, false)?;
        let channel_bytes = transfer_bytes(frames, setup.format.bytes())?;
        if bufs.len() != setup.channels as usize || bufs.iter().any(|b| b.len() < channel_bytes) {
            return Err(Error::InvalidArgument("channel buffers do not match setup".into()));
        }
        let areas = Areas::separate(bufs, setup.format);
        self.write_areas(&setup, &areas, frames)
    }

    /// Read interleaved frames
    pub fn readi(&mut self, buf: &mut [u8], frames: usize) -> Result<usize> {
        let setup = self.check_transfer(Stream::Capture, true)?;
        if buf.len() < transfer_bytes(frames, setup.frame_bytes())? {
            return Err(Error::InvalidArgument("buffer shorter than frame count".into()));
        }
        let mut areas = AreasMut::interleaved(buf, setup.channels as usize, setup.format);
        self.read_areas(&setup, &mut areas, frames)
    }

    /// Read one buffer per channel
    pub fn readn(&mut self, bufs: Vec<&mut [u8]>, frames: usize) -> Result<usize> {
        let setup = self.check_transfer(Stream::Capture, false)?;
        let channel_bytes = transfer_bytes(frames, setup.format.bytes())?;
        if bufs.len() != setup.channels as usize || bufs.iter().any(|b| b.len() < channel_bytes) {
            return Err(Error::InvalidArgument("channel buffers do not match setup".into()));
        }
        let mut areas = AreasMut::separate(bufs, setup.format);
        self.read_areas(&setup, &mut areas, frames)
    }

    fn write_areas(&mut self, setup: &PcmSetup, areas: &Areas<'_>, frames: usize) -> Result<usize> {
        let channels = setup.channels as usize;
        let mut done = 0;
        while done < frames {
            let avail = self.ops.avail_update(&mut self.common)?;
            if avail == 0 {
                if self.common.state == State::Prepared {
                    self.start()?;
                    continue;
                }
                if done > 0 {
                    break;
                }
                if self.common.mode.is_nonblock() {
                    return Err(Error::WouldBlock);
                }
                if !self.ops.wait(&mut self.common, -1)? {
                    return Err(Error::WouldBlock);
                }
                continue;
            }
            let (offset, count) = {
                let mut region = self.ops.mmap_begin(&self.common, (frames - done).min(avail))?;
                areas_copy(
                    &mut region.areas,
                    region.offset,
                    areas,
                    done,
                    channels,
                    region.frames,
                    setup.format,
                );
                (region.offset, region.frames)
            };
            let committed = self.mmap_commit(offset, count)?;
            if committed == 0 {
                break;
            }
            done += committed;
        }
        Ok(done)
    }

    fn read_areas(
        &mut self,
        setup: &PcmSetup,
        areas: &mut AreasMut<'_>,
        frames: usize,
    ) -> Result<usize> {
        if self.common.state == State::Prepared {
            self.start()?;
        }
        let channels = setup.channels as usize;
        let mut done = 0;
        while done < frames {
            let avail = self.ops.avail_update(&mut self.common)?;
            if avail == 0 {
                if done > 0 {
                    break;
                }
                if self.common.mode.is_nonblock() {
                    return Err(Error::WouldBlock);
                }
                if !self.ops.wait(&mut self.common, -1)? {
                    return Err(Error::WouldBlock);
                }
                continue;
            }
            let (offset, count) = {
                let region = self.ops.mmap_begin(&self.common, (frames - done).min(avail))?;
                let source = region.areas.as_areas();
                areas_copy(areas, done, &source, region.offset, channels, region.frames, setup.format);
                (region.offset, region.frames)
            };
            let committed = self.ops.mmap_commit(&mut self.common, offset, count)?;
            if committed == 0 {
                break;
            }
            done += committed;
        }
        Ok(done)
    }

    /// Write a human readable description of this PCM and its slaves
    pub fn dump(&mut self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.ops.dump(&self.common, out)
    }

    pub fn dump_to_string(&mut self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.dump(&mut out);
        out
    }

    /// Write the committed setup section of a dump
    pub fn dump_setup(common: &PcmCommon, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "  stream       : {}", common.stream)?;
        if let Some(setup) = &common.setup {
            write!(out, "{}", setup)?;
            writeln!(out, "  tstamp_type  : {:?}", common.tstamp_type)?;
            writeln!(out, "  avail_min    : {}", common.sw_params.avail_min)?;
            writeln!(out, "  start_thresh : {}", common.sw_params.start_threshold)?;
            writeln!(out, "  stop_thresh  : {}", common.sw_params.stop_threshold)?;
        }
        Ok(())
    }

    /// Committed setup as JSON
    pub fn setup_json(&self) -> Result<String> {
        let setup = self.common.require_setup()?;
        serde_json::to_string_pretty(&setup)
            .map_err(|e| Error::InvalidArgument(format!("cannot serialize setup: {}", e)))
    }

    /// Close the PCM, releasing its slave chain
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if matches!(self.common.state, State::Running | State::Draining) {
            let _ = self.ops.drop_frames(&mut self.common);
        }
        tracing::debug!(pcm = %self.common.name, "closing");
        self.ops.close(&mut self.common)
    }
}

impl Drop for Pcm {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            tracing::warn!("Failed to close PCM {}: {}", self.common.name, e);
        }
    }
}

/// Byte length of `frames` units of `unit` bytes
fn transfer_bytes(frames: usize, unit: usize) -> Result<usize> {
    frames
        .checked_mul(unit)
        .ok_or_else(|| Error::InvalidArgument(format!("{} frames overflow the buffer size", frames)))
}
