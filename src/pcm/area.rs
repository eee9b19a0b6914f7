//! Channel area descriptors and sample copying
//!
//! An area describes where the samples of one channel live: which buffer,
//! the bit offset of the first sample and the bit distance between two
//! consecutive samples. Interleaved and non-interleaved layouts are just
//! different `first`/`step` choices over one or more buffers. Areas borrow
//! their buffers, so they never outlive the transfer that uses them.

use crate::error::{Error, Result};
use crate::pcm::format::Format;
use crate::pcm::PcmSetup;

/// Location of one channel's samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelArea {
    /// Index of the buffer holding this channel
    pub buf: usize,
    /// Bit offset of the first sample
    pub first: usize,
    /// Bit distance between consecutive samples
    pub step: usize,
}

impl ChannelArea {
    fn byte_offset(&self, frame: usize) -> usize {
        debug_assert!(self.first % 8 == 0 && self.step % 8 == 0);
        (self.first + frame * self.step) / 8
    }
}

/// Layout of `channels` interleaved channels in one buffer
pub fn interleaved_layout(channels: usize, format: Format) -> Vec<ChannelArea> {
    let width = format.physical_width() as usize;
    (0..channels)
        .map(|ch| ChannelArea {
            buf: 0,
            first: ch * width,
            step: channels * width,
        })
        .collect()
}

/// Layout of `channels` consecutive planes of `frames` samples in one buffer
pub fn planar_layout(channels: usize, frames: usize, format: Format) -> Vec<ChannelArea> {
    let width = format.physical_width() as usize;
    (0..channels)
        .map(|ch| ChannelArea {
            buf: 0,
            first: ch * frames * width,
            step: width,
        })
        .collect()
}

/// Layout of one buffer per channel
pub fn separate_layout(channels: usize, format: Format) -> Vec<ChannelArea> {
    let width = format.physical_width() as usize;
    (0..channels)
        .map(|ch| ChannelArea {
            buf: ch,
            first: 0,
            step: width,
        })
        .collect()
}

/// Read-only channel areas
pub struct Areas<'a> {
    bufs: Vec<&'a [u8]>,
    channels: Vec<ChannelArea>,
}

impl<'a> Areas<'a> {
    pub fn new(bufs: Vec<&'a [u8]>, channels: Vec<ChannelArea>) -> Self {
        Self { bufs, channels }
    }

    /// Interleaved frames in a single buffer
    pub fn interleaved(buf: &'a [u8], channels: usize, format: Format) -> Self {
        Self::new(vec![buf], interleaved_layout(channels, format))
    }

    /// One buffer per channel
    pub fn separate(bufs: &[&'a [u8]], format: Format) -> Self {
        Self::new(bufs.to_vec(), separate_layout(bufs.len(), format))
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn area(&self, channel: usize) -> &ChannelArea {
        &self.channels[channel]
    }

    fn sample(&self, channel: usize, frame: usize, bytes: usize) -> &[u8] {
        let area = &self.channels[channel];
        let start = area.byte_offset(frame);
        &self.bufs[area.buf][start..start + bytes]
    }
}

/// Writable channel areas
pub struct AreasMut<'a> {
    bufs: Vec<&'a mut [u8]>,
    channels: Vec<ChannelArea>,
}

impl<'a> AreasMut<'a> {
    pub fn new(bufs: Vec<&'a mut [u8]>, channels: Vec<ChannelArea>) -> Self {
        Self { bufs, channels }
    }

    /// Interleaved frames in a single buffer
    pub fn interleaved(buf: &'a mut [u8], channels: usize, format: Format) -> Self {
        Self::new(vec![buf], interleaved_layout(channels, format))
    }

    /// One buffer per channel
    pub fn separate(bufs: Vec<&'a mut [u8]>, format: Format) -> Self {
        let layout = separate_layout(bufs.len(), format);
        Self::new(bufs, layout)
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn area(&self, channel: usize) -> &ChannelArea {
        &self.channels[channel]
    }

    /// Read-only view of the same areas
    pub fn as_areas(&self) -> Areas<'_> {
        Areas {
            bufs: self.bufs.iter().map(|b| &**b).collect(),
            channels: self.channels.clone(),
        }
    }

    fn sample_mut(&mut self, channel: usize, frame: usize, bytes: usize) -> &mut [u8] {
        let area = self.channels[channel];
        let start = area.byte_offset(frame);
        &mut self.bufs[area.buf][start..start + bytes]
    }
}

/// Copy `frames` samples of one channel
#[allow(clippy::too_many_arguments)]
pub fn area_copy(
    dst: &mut AreasMut<'_>,
    dst_channel: usize,
    dst_offset: usize,
    src: &Areas<'_>,
    src_channel: usize,
    src_offset: usize,
    frames: usize,
    format: Format,
) {
    if frames == 0 {
        return;
    }
    let bytes = format.bytes();
    let width = format.physical_width() as usize;
    let src_area = *src.area(src_channel);
    let dst_area = *dst.area(dst_channel);

    if src_area.step == width && dst_area.step == width {
        // Both sides contiguous: one slice copy
        let s = src_area.byte_offset(src_offset);
        let d = dst_area.byte_offset(dst_offset);
        let len = frames * bytes;
        dst.bufs[dst_area.buf][d..d + len].copy_from_slice(&src.bufs[src_area.buf][s..s + len]);
        return;
    }

    for i in 0..frames {
        let sample = src.sample(src_channel, src_offset + i, bytes);
        dst.sample_mut(dst_channel, dst_offset + i, bytes)
            .copy_from_slice(sample);
    }
}

/// Copy `frames` frames of `channels` channels between two area sets
pub fn areas_copy(
    dst: &mut AreasMut<'_>,
    dst_offset: usize,
    src: &Areas<'_>,
    src_offset: usize,
    channels: usize,
    frames: usize,
    format: Format,
) {
    for ch in 0..channels {
        area_copy(dst, ch, dst_offset, src, ch, src_offset, frames, format);
    }
}

/// Fill `frames` frames of `channels` channels with silence
pub fn areas_silence(
    dst: &mut AreasMut<'_>,
    dst_offset: usize,
    channels: usize,
    frames: usize,
    format: Format,
) {
    let silence = format.silence();
    for ch in 0..channels {
        for i in 0..frames {
            dst.sample_mut(ch, dst_offset + i, silence.len())
                .copy_from_slice(&silence);
        }
    }
}

/// Buffer owned by a PCM together with the layout of its channels
#[derive(Debug, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
    layout: Vec<ChannelArea>,
    frames: usize,
}

impl FrameBuffer {
    /// Allocate `setup.buffer_size` frames laid out according to the access type
    pub fn allocate(setup: &PcmSetup) -> Result<Self> {
        let bytes = setup.buffer_bytes();
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|e| Error::NoMemory(format!("buffer of {} bytes: {}", bytes, e)))?;
        data.resize(bytes, 0);
        let channels = setup.channels as usize;
        let frames = setup.buffer_size as usize;
        let layout = if setup.access.is_interleaved() {
            interleaved_layout(channels, setup.format)
        } else {
            planar_layout(channels, frames, setup.format)
        };
        let mut buffer = Self { data, layout, frames };
        buffer.silence(setup.format);
        Ok(buffer)
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn is_allocated(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn layout(&self) -> &[ChannelArea] {
        &self.layout
    }

    pub fn areas(&self) -> Areas<'_> {
        Areas::new(vec![&self.data[..]], self.layout.clone())
    }

    pub fn areas_mut(&mut self) -> AreasMut<'_> {
        AreasMut::new(vec![&mut self.data[..]], self.layout.clone())
    }

    /// Fill the whole buffer with silence
    pub fn silence(&mut self, format: Format) {
        let channels = self.layout.len();
        let frames = self.frames;
        if frames == 0 {
            return;
        }
        areas_silence(&mut self.areas_mut(), 0, channels, frames, format);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames_s16(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_interleaved_copy() {
        let src_buf = frames_s16(&[1, 2, 3, 4, 5, 6]);
        let mut dst_buf = vec![0u8; src_buf.len()];
        let src = Areas::interleaved(&src_buf, 2, Format::S16Le);
        let mut dst = AreasMut::interleaved(&mut dst_buf, 2, Format::S16Le);

        areas_copy(&mut dst, 1, &src, 0, 2, 2, Format::S16Le);

        assert_eq!(dst_buf, frames_s16(&[0, 0, 1, 2, 3, 4]));
    }

    #[test]
    fn test_interleaved_to_separate() {
        let src_buf = frames_s16(&[10, 20, 11, 21, 12, 22]);
        let mut left = vec![0u8; 6];
        let mut right = vec![0u8; 6];
        {
            let src = Areas::interleaved(&src_buf, 2, Format::S16Le);
            let mut dst = AreasMut::separate(vec![&mut left, &mut right], Format::S16Le);
            areas_copy(&mut dst, 0, &src, 0, 2, 3, Format::S16Le);
        }
        assert_eq!(left, frames_s16(&[10, 11, 12]));
        assert_eq!(right, frames_s16(&[20, 21, 22]));
    }

    #[test]
    fn test_planar_layout_roundtrip() {
        let planar = frames_s16(&[1, 2, 3, 7, 8, 9]);
        let mut interleaved = vec![0u8; planar.len()];
        {
            let src = Areas::new(vec![&planar], planar_layout(2, 3, Format::S16Le));
            let mut dst = AreasMut::interleaved(&mut interleaved, 2, Format::S16Le);
            areas_copy(&mut dst, 0, &src, 0, 2, 3, Format::S16Le);
        }
        assert_eq!(interleaved, frames_s16(&[1, 7, 2, 8, 3, 9]));
    }

    #[test]
    fn test_zero_frames_is_noop() {
        let src_buf = frames_s16(&[5, 5]);
        let mut dst_buf = vec![9u8; 4];
        let src = Areas::interleaved(&src_buf, 2, Format::S16Le);
        let mut dst = AreasMut::interleaved(&mut dst_buf, 2, Format::S16Le);
        areas_copy(&mut dst, 0, &src, 0, 2, 0, Format::S16Le);
        assert_eq!(dst_buf, vec![9u8; 4]);
    }

    #[test]
    fn test_silence_unsigned() {
        let mut buf = vec![0u8; 4];
        let mut dst = AreasMut::interleaved(&mut buf, 2, Format::U16Le);
        areas_silence(&mut dst, 0, 2, 1, Format::U16Le);
        assert_eq!(buf, vec![0x00, 0x80, 0x00, 0x80]);
    }

    #[test]
    fn test_three_byte_format() {
        let src_buf: Vec<u8> = (1..=12).collect();
        let mut dst_buf = vec![0u8; 12];
        let src = Areas::interleaved(&src_buf, 2, Format::S24_3Le);
        let mut dst = AreasMut::interleaved(&mut dst_buf, 2, Format::S24_3Le);
        areas_copy(&mut dst, 0, &src, 0, 2, 2, Format::S24_3Le);
        assert_eq!(dst_buf, src_buf);
    }
}
