//! Copy PCM: forwards frames unchanged to a single slave in either direction

use std::fmt;

use crate::config::PcmDefinition;
use crate::error::Result;
use crate::pcm::mode::OpenMode;
use crate::pcm::ops::PcmOps;
use crate::pcm::params::HwParams;
use crate::pcm::plugin::{FormatCopy, PluginBase};
use crate::pcm::refine::{hw_params_slave, hw_refine_slave, LinkedRefine};
use crate::pcm::slave::{attach_slave, Generic, SlaveHandle, SlaveOpener};
use crate::pcm::{ChannelInfo, MmapRegion, Pcm, PcmCommon, PcmSetup, Stream};

pub struct CopyPcm {
    plugin: PluginBase,
    refine: LinkedRefine,
    transfer: FormatCopy,
}

impl CopyPcm {
    /// Stack a copy plugin on `slave`
    pub fn open(
        name: &str,
        mut slave: SlaveHandle,
        stream: Stream,
        mode: OpenMode,
    ) -> Result<Pcm> {
        let mut common = PcmCommon::new(name, stream, mode);
        attach_slave(&mut common, &slave.lock())?;
        let ops = CopyPcm {
            plugin: PluginBase::new(Generic::new(slave)),
            refine: LinkedRefine::copying(),
            transfer: FormatCopy,
        };
        Ok(Pcm::new(common, Box::new(ops)))
    }

    /// Open from a `type = "copy"` definition with a `slave` field
    pub fn open_definition(
        def: &PcmDefinition<'_>,
        stream: Stream,
        mode: OpenMode,
        opener: &dyn SlaveOpener,
    ) -> Result<Pcm> {
        def.check_fields(&["slave"])?;
        let slave_name = def.get_str("slave")?.ok_or_else(|| {
            crate::config::config_error(crate::error::ConfigError::MissingField {
                context: format!("pcm.{}", def.name),
                field: "slave".into(),
            })
        })?;
        let slave = opener.open_slave(slave_name, stream, mode)?;
        Self::open(def.name, SlaveHandle::owned(slave), stream, mode)
    }
}

impl PcmOps for CopyPcm {
    fn type_name(&self) -> &'static str {
        "copy"
    }

    fn generic(&mut self) -> Option<&mut Generic> {
        Some(&mut self.plugin.generic)
    }

    fn hw_refine(&mut self, common: &mut PcmCommon, params: &mut HwParams) -> Result<()> {
        let mut slave = self.plugin.generic.slave(&common.name)?;
        hw_refine_slave(params, &self.refine, |sparams| slave.hw_refine(sparams))
    }

    fn hw_params(&mut self, common: &mut PcmCommon, params: &mut HwParams) -> Result<()> {
        {
            let mut slave = self.plugin.generic.slave(&common.name)?;
            hw_params_slave(params, &self.refine, |sparams| slave.hw_params(sparams))?;
        }
        self.plugin.setup_buffers(&PcmSetup::from_params(params)?)
    }

    fn hw_free(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.plugin.hw_free(common)
    }

    fn channel_info(&mut self, common: &PcmCommon, channel: u32) -> Result<ChannelInfo> {
        self.plugin.channel_info(common, channel)
    }

    fn dump(&mut self, common: &PcmCommon, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "Copy conversion PCM {}", common.name)?;
        Pcm::dump_setup(common, out)?;
        self.plugin.dump_slave(common, out)
    }

    fn prepare(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.plugin.prepare(common)
    }

    fn start(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.plugin.start(common)
    }

    fn drop_frames(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.plugin.drop_frames(common)
    }

    fn drain(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.plugin.drain(common)
    }

    fn avail_update(&mut self, common: &mut PcmCommon) -> Result<usize> {
        self.plugin.avail_update(common, &self.transfer)
    }

    fn mmap_begin(&mut self, common: &PcmCommon, frames: usize) -> Result<MmapRegion<'_>> {
        self.plugin.mmap_begin(common, frames)
    }

    fn mmap_commit(
        &mut self,
        common: &mut PcmCommon,
        offset: usize,
        frames: usize,
    ) -> Result<usize> {
        self.plugin.mmap_commit(common, &self.transfer, offset, frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::format::Format;
    use crate::pcm::params::Access;
    use crate::plugins::buffer::{self, BufferCaps, Tap};

    fn params() -> HwParams {
        let mut params = HwParams::any();
        params.set_access(Access::RwInterleaved).unwrap();
        params.set_format(Format::S16Le).unwrap();
        params.set_channels(1).unwrap();
        params.set_rate(8000).unwrap();
        params.set_period_size(16).unwrap();
        params.set_periods(4).unwrap();
        params
    }

    #[test]
    fn test_copy_playback_reaches_slave() {
        let tap = Tap::new();
        let caps = BufferCaps::default();
        let slave = buffer::open("hw", Stream::Playback, OpenMode::BLOCK, caps, tap.clone()).unwrap();
        let mut pcm =
            CopyPcm::open("copy", SlaveHandle::owned(slave), Stream::Playback, OpenMode::BLOCK)
                .unwrap();
        pcm.hw_params(&mut params()).unwrap();

        let data: Vec<u8> = (0..200u8).collect();
        assert_eq!(pcm.writei(&data, 100).unwrap(), 100);
        assert_eq!(tap.recorded(), data);
    }

    #[test]
    fn test_copy_capture_from_slave() {
        let tap = Tap::new();
        let source: Vec<u8> = (0..40u8).collect();
        tap.preload(&source);
        let slave = buffer::open("hw", Stream::Capture, OpenMode::BLOCK, BufferCaps::default(), tap)
            .unwrap();
        let mut pcm =
            CopyPcm::open("copy", SlaveHandle::owned(slave), Stream::Capture, OpenMode::BLOCK)
                .unwrap();
        pcm.hw_params(&mut params()).unwrap();

        let mut buf = vec![0u8; 40];
        assert_eq!(pcm.readi(&mut buf, 20).unwrap(), 20);
        assert_eq!(buf, source);
    }

    #[test]
    fn test_shared_slave_survives_close() {
        let slave = crate::plugins::null::open("null", Stream::Playback, OpenMode::BLOCK)
            .unwrap()
            .into_shared();
        let pcm = CopyPcm::open(
            "copy",
            SlaveHandle::shared(slave.clone()),
            Stream::Playback,
            OpenMode::BLOCK,
        )
        .unwrap();
        pcm.close().unwrap();
        assert_eq!(std::sync::Arc::strong_count(&slave), 1);
        assert!(slave.lock().info().is_ok());
    }
}
