//! Shared machinery of plugins that move frames to or from one slave
//!
//! A plugin owns a staging buffer the application maps and transfers
//! into. Playback frames are pushed to the slave on commit; capture
//! frames are pulled from the slave while updating the available count.
//! The per-frame work in between is an [`AreaTransfer`].

use std::fmt;

use crate::error::{Error, Result};
use crate::pcm::area::{areas_copy, Areas, AreasMut, FrameBuffer};
use crate::pcm::slave::Generic;
use crate::pcm::{ChannelInfo, MmapRegion, PcmCommon, PcmSetup, State, Stream};

/// Moves frames between the plugin's areas and the slave's areas
pub trait AreaTransfer: Send {
    /// Move up to `size` frames towards the slave.
    ///
    /// `slave_size` holds the slave capacity on entry and the frames the
    /// slave received on return. Returns the client frames consumed.
    #[allow(clippy::too_many_arguments)]
    fn transfer_out(
        &self,
        setup: &PcmSetup,
        areas: &Areas<'_>,
        offset: usize,
        size: usize,
        slave_areas: &mut AreasMut<'_>,
        slave_offset: usize,
        slave_size: &mut usize,
    ) -> usize;

    /// Move up to `size` frames from the slave into the client areas
    #[allow(clippy::too_many_arguments)]
    fn transfer_in(
        &self,
        setup: &PcmSetup,
        areas: &mut AreasMut<'_>,
        offset: usize,
        size: usize,
        slave_areas: &Areas<'_>,
        slave_offset: usize,
        slave_size: &mut usize,
    ) -> usize;
}

/// Byte-exact copy for plugins whose slave shares the client format
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatCopy;

impl AreaTransfer for FormatCopy {
    fn transfer_out(
        &self,
        setup: &PcmSetup,
        areas: &Areas<'_>,
        offset: usize,
        size: usize,
        slave_areas: &mut AreasMut<'_>,
        slave_offset: usize,
        slave_size: &mut usize,
    ) -> usize {
        let frames = size.min(*slave_size);
        areas_copy(
            slave_areas,
            slave_offset,
            areas,
            offset,
            setup.channels as usize,
            frames,
            setup.format,
        );
        *slave_size = frames;
        frames
    }

    fn transfer_in(
        &self,
        setup: &PcmSetup,
        areas: &mut AreasMut<'_>,
        offset: usize,
        size: usize,
        slave_areas: &Areas<'_>,
        slave_offset: usize,
        slave_size: &mut usize,
    ) -> usize {
        let frames = size.min(*slave_size);
        areas_copy(
            areas,
            offset,
            slave_areas,
            slave_offset,
            setup.channels as usize,
            frames,
            setup.format,
        );
        *slave_size = frames;
        frames
    }
}

/// Slave slot plus staging buffer and position bookkeeping
#[derive(Default)]
pub struct PluginBase {
    pub generic: Generic,
    staging: FrameBuffer,
    last_slave_hw: i64,
}

impl PluginBase {
    pub fn new(generic: Generic) -> Self {
        Self {
            generic,
            staging: FrameBuffer::default(),
            last_slave_hw: 0,
        }
    }

    /// Allocate the staging buffer for a committed setup
    pub fn setup_buffers(&mut self, setup: &PcmSetup) -> Result<()> {
        self.staging = FrameBuffer::allocate(setup)?;
        Ok(())
    }

    pub fn free_buffers(&mut self) {
        self.staging = FrameBuffer::default();
    }

    pub fn channel_info(&self, common: &PcmCommon, channel: u32) -> Result<ChannelInfo> {
        common.require_setup()?;
        let area = self.staging.layout().get(channel as usize).ok_or_else(|| {
            Error::InvalidArgument(format!("channel {} out of range", channel))
        })?;
        Ok(ChannelInfo {
            channel,
            first: area.first,
            step: area.step,
        })
    }

    pub fn hw_free(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.free_buffers();
        self.generic.slave(&common.name)?.hw_free()
    }

    pub fn prepare(&mut self, common: &mut PcmCommon) -> Result<()> {
        let setup = common.require_setup()?;
        let mut slave = self.generic.slave(&common.name)?;
        slave.prepare()?;
        self.last_slave_hw = slave.position().hw().get().max(0);
        drop(slave);
        common.link.start_own();
        self.staging.silence(setup.format);
        Ok(())
    }

    pub fn start(&mut self, common: &mut PcmCommon) -> Result<()> {
        let mut slave = self.generic.slave(&common.name)?;
        if slave.state() == State::Prepared {
            slave.start()?;
        }
        Ok(())
    }

    pub fn drop_frames(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.generic.slave(&common.name)?.drop_frames()?;
        let appl = common.link.appl().get();
        common.link.hw().set(appl);
        Ok(())
    }

    pub fn drain(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.generic.slave(&common.name)?.drain()?;
        if common.stream == Stream::Playback {
            let appl = common.link.appl().get();
            common.link.hw().set(appl);
        }
        Ok(())
    }

    /// Follow the slave's hardware position and return the client avail
    pub fn avail_update<T: AreaTransfer + ?Sized>(
        &mut self,
        common: &mut PcmCommon,
        transfer: &T,
    ) -> Result<usize> {
        let setup = common.require_setup()?;
        let buffer = setup.buffer_size as usize;
        let mut slave = self.generic.slave(&common.name)?;
        let slave_avail = slave.avail_update()?;

        if !common.link.is_linked_to(slave.position()) {
            // The slave replaced its own counters; follow the new ones
            common.link.unlink_hw();
            common.link.unlink_appl();
            common.link.link_hw(slave.position())?;
            common.link.link_appl(slave.position())?;
            self.last_slave_hw = 0;
        }

        match common.stream {
            Stream::Playback => {
                let slave_hw = common
                    .link
                    .slave_hw()
                    .map(|hw| hw.get().max(0))
                    .unwrap_or(0);
                let delta = slave_hw - self.last_slave_hw;
                if delta > 0 {
                    let pending = common.queued();
                    common.link.hw().advance((delta as usize).min(pending));
                }
                self.last_slave_hw = slave_hw;
                Ok((buffer - common.queued().min(buffer)).min(slave_avail))
            }
            Stream::Capture => {
                let mut available = slave_avail;
                while available > 0 {
                    let filled = common.queued();
                    if filled >= buffer {
                        break;
                    }
                    let hw = common.link.hw().get().max(0) as usize;
                    let offset = hw % buffer;
                    let want = (buffer - filled).min(buffer - offset).min(available);

                    let (slave_offset, slave_frames, moved) = {
                        let region = slave.mmap_begin(want)?;
                        let source = region.areas.as_areas();
                        let mut dest = self.staging.areas_mut();
                        let mut slave_frames = region.frames;
                        let moved = transfer.transfer_in(
                            &setup,
                            &mut dest,
                            offset,
                            want,
                            &source,
                            region.offset,
                            &mut slave_frames,
                        );
                        (region.offset, slave_frames, moved)
                    };
                    slave.mmap_commit(slave_offset, slave_frames)?;
                    if moved == 0 {
                        break;
                    }
                    common.link.hw().advance(moved);
                    available = slave.avail_update()?;
                }
                Ok(common.queued())
            }
        }
    }

    /// Staging window at the application position
    pub fn mmap_begin(&mut self, common: &PcmCommon, frames: usize) -> Result<MmapRegion<'_>> {
        let setup = common.require_setup()?;
        let buffer = setup.buffer_size as usize;
        let offset = common.link.appl().get().max(0) as usize % buffer;
        Ok(MmapRegion {
            frames: frames.min(buffer - offset),
            offset,
            areas: self.staging.areas_mut(),
        })
    }

    /// Push committed playback frames to the slave, or release read capture frames
    pub fn mmap_commit<T: AreaTransfer + ?Sized>(
        &mut self,
        common: &mut PcmCommon,
        transfer: &T,
        offset: usize,
        frames: usize,
    ) -> Result<usize> {
        let setup = common.require_setup()?;
        if common.stream == Stream::Capture {
            common.link.appl().advance(frames);
            return Ok(frames);
        }

        let mut slave = self.generic.slave(&common.name)?;
        let source = self.staging.areas();
        let mut moved = 0;
        while moved < frames {
            let slave_avail = slave.avail_update()?;
            if slave_avail == 0 {
                break;
            }
            let (slave_offset, slave_frames, count) = {
                let mut region = slave.mmap_begin(slave_avail.min(frames - moved))?;
                let mut slave_frames = region.frames;
                let count = transfer.transfer_out(
                    &setup,
                    &source,
                    offset + moved,
                    frames - moved,
                    &mut region.areas,
                    region.offset,
                    &mut slave_frames,
                );
                (region.offset, slave_frames, count)
            };
            slave.mmap_commit(slave_offset, slave_frames)?;
            if count == 0 {
                break;
            }
            moved += count;
        }
        common.link.appl().advance(moved);
        Ok(moved)
    }

    /// Dump the slave chain below this plugin
    pub fn dump_slave(&mut self, common: &PcmCommon, out: &mut dyn fmt::Write) -> fmt::Result {
        match self.generic.slave(&common.name) {
            Ok(mut slave) => {
                writeln!(out, "Slave: ")?;
                slave.dump(out)
            }
            Err(_) => writeln!(out, "Slave: none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::format::Format;
    use crate::pcm::params::Access;

    fn setup_s16_stereo() -> PcmSetup {
        PcmSetup {
            access: Access::RwInterleaved,
            format: Format::S16Le,
            channels: 2,
            rate: 48000,
            period_size: 4,
            periods: 2,
            buffer_size: 8,
            sample_bits: 16,
            frame_bits: 32,
        }
    }

    #[test]
    fn test_format_copy_clamps_to_capacity() {
        let setup = setup_s16_stereo();
        let src_buf: Vec<u8> = (0..32).collect();
        let mut dst_buf = vec![0u8; 12];
        let src = Areas::interleaved(&src_buf, 2, Format::S16Le);
        let mut dst = AreasMut::interleaved(&mut dst_buf, 2, Format::S16Le);

        let mut capacity = 3;
        let moved = FormatCopy.transfer_out(&setup, &src, 1, 6, &mut dst, 0, &mut capacity);

        assert_eq!(moved, 3);
        assert_eq!(capacity, 3);
        assert_eq!(dst_buf, (4..16).collect::<Vec<u8>>());
    }

    #[test]
    fn test_format_copy_in() {
        let setup = setup_s16_stereo();
        let slave_buf: Vec<u8> = (100..116).collect();
        let mut client_buf = vec![0u8; 16];
        let slave = Areas::interleaved(&slave_buf, 2, Format::S16Le);
        let mut client = AreasMut::interleaved(&mut client_buf, 2, Format::S16Le);

        let mut available = 4;
        let moved = FormatCopy.transfer_in(&setup, &mut client, 0, 8, &slave, 0, &mut available);

        assert_eq!(moved, 4);
        assert_eq!(client_buf, slave_buf);
    }

    #[test]
    fn test_format_copy_touches_only_the_window() {
        let setup = setup_s16_stereo();
        let src_buf: Vec<u8> = (0..40).collect();
        let src = Areas::interleaved(&src_buf, 2, Format::S16Le);

        let mut dst_buf = vec![0xaau8; 40];
        let mut capacity = 3;
        let moved = {
            let mut dst = AreasMut::interleaved(&mut dst_buf, 2, Format::S16Le);
            FormatCopy.transfer_out(&setup, &src, 2, 5, &mut dst, 4, &mut capacity)
        };
        assert_eq!(moved, 3);
        assert_eq!(capacity, 3);
        assert!(dst_buf[..16].iter().all(|&b| b == 0xaa));
        assert_eq!(&dst_buf[16..28], &src_buf[8..20]);
        assert!(dst_buf[28..].iter().all(|&b| b == 0xaa));

        let mut client_buf = vec![0xaau8; 40];
        let mut available = 2;
        let moved = {
            let mut client = AreasMut::interleaved(&mut client_buf, 2, Format::S16Le);
            FormatCopy.transfer_in(&setup, &mut client, 6, 4, &src, 1, &mut available)
        };
        assert_eq!(moved, 2);
        assert_eq!(available, 2);
        assert!(client_buf[..24].iter().all(|&b| b == 0xaa));
        assert_eq!(&client_buf[24..32], &src_buf[4..12]);
        assert!(client_buf[32..].iter().all(|&b| b == 0xaa));
    }

    #[test]
    fn test_staging_layout_follows_access() {
        let mut base = PluginBase::default();
        let mut setup = setup_s16_stereo();
        setup.access = Access::RwNonInterleaved;
        base.setup_buffers(&setup).unwrap();
        assert_eq!(base.staging.frames(), 8);
        assert_eq!(base.staging.layout()[1].first, 8 * 16);
        assert_eq!(base.staging.layout()[1].step, 16);
    }
}
