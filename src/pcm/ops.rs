//! Operation table implemented by every PCM device
//!
//! Lifecycle and configuration calls have pass-through defaults that
//! forward to the slave held in [`PcmOps::generic`], so a plugin only
//! overrides what it changes. Leaf devices have no slave and override
//! what they support; the remaining defaults report `NotSupported`.

use std::fmt;

use crate::error::{Error, Result};
use crate::pcm::chmap::{ChannelMap, QueriedChmap};
use crate::pcm::params::HwParams;
use crate::pcm::slave::{Generic, SlaveGuard};
use crate::pcm::{ChannelInfo, MmapRegion, PcmCommon, PcmIdentity, SwParams};

pub trait PcmOps: Send {
    /// Device type name as used in configuration, e.g. `fswitch`
    fn type_name(&self) -> &'static str;

    /// Slave holder used by the pass-through defaults
    fn generic(&mut self) -> Option<&mut Generic> {
        None
    }

    /// Borrow the current slave of the PCM named `master`
    fn slave(&mut self, master: &str) -> Result<SlaveGuard<'_>> {
        match self.generic() {
            Some(generic) => generic.slave(master),
            None => Err(Error::NotSupported(master.to_string())),
        }
    }

    fn close(&mut self, _common: &mut PcmCommon) -> Result<()> {
        match self.generic() {
            Some(generic) => generic.close_slave(),
            None => Ok(()),
        }
    }

    fn info(&mut self, common: &PcmCommon) -> Result<PcmIdentity> {
        self.slave(&common.name)?.info()
    }

    fn hw_refine(&mut self, common: &mut PcmCommon, params: &mut HwParams) -> Result<()>;

    fn hw_params(&mut self, common: &mut PcmCommon, params: &mut HwParams) -> Result<()>;

    fn hw_free(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.slave(&common.name)?.hw_free()
    }

    fn sw_params(&mut self, common: &mut PcmCommon, params: &SwParams) -> Result<()> {
        self.slave(&common.name)?.sw_params(params)
    }

    fn channel_info(&mut self, common: &PcmCommon, channel: u32) -> Result<ChannelInfo> {
        self.slave(&common.name)?.channel_info(channel)
    }

    fn dump(&mut self, common: &PcmCommon, out: &mut dyn fmt::Write) -> fmt::Result;

    fn nonblock(&mut self, common: &mut PcmCommon, nonblock: bool) -> Result<()> {
        self.slave(&common.name)?.nonblock(nonblock)
    }

    fn async_mode(&mut self, common: &mut PcmCommon, enable: bool) -> Result<()> {
        self.slave(&common.name)?.async_mode(enable)
    }

    fn mmap(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.slave(&common.name)?.mmap()
    }

    fn munmap(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.slave(&common.name)?.munmap()
    }

    fn query_chmaps(&mut self, common: &PcmCommon) -> Result<Vec<QueriedChmap>> {
        self.slave(&common.name)?.query_chmaps()
    }

    fn get_chmap(&mut self, common: &PcmCommon) -> Result<ChannelMap> {
        self.slave(&common.name)?.get_chmap()
    }

    fn set_chmap(&mut self, common: &mut PcmCommon, map: &ChannelMap) -> Result<()> {
        self.slave(&common.name)?.set_chmap(map)
    }

    fn prepare(&mut self, common: &mut PcmCommon) -> Result<()>;

    fn start(&mut self, common: &mut PcmCommon) -> Result<()>;

    fn drop_frames(&mut self, common: &mut PcmCommon) -> Result<()>;

    fn drain(&mut self, common: &mut PcmCommon) -> Result<()>;

    /// Synchronize positions and return the frames available to the application
    fn avail_update(&mut self, common: &mut PcmCommon) -> Result<usize>;

    /// Wait until frames are available; `false` on timeout
    fn wait(&mut self, common: &mut PcmCommon, timeout_ms: i32) -> Result<bool> {
        self.slave(&common.name)?.wait(timeout_ms)
    }

    /// Window of at most `frames` contiguous frames at the application position
    fn mmap_begin(&mut self, common: &PcmCommon, frames: usize) -> Result<MmapRegion<'_>>;

    /// Hand `frames` frames at `offset` over; returns the frames accepted
    fn mmap_commit(&mut self, common: &mut PcmCommon, offset: usize, frames: usize)
        -> Result<usize>;
}
