//! Property tests for refinement and frame transfer

use proptest::prelude::*;

use pcmplug::error::Error;
use pcmplug::pcm::area::{areas_copy, planar_layout, Areas, AreasMut};
use pcmplug::pcm::format::Format;
use pcmplug::pcm::mode::OpenMode;
use pcmplug::pcm::params::{Access, HwParams, Interval, ParamKind};
use pcmplug::pcm::plugin::{AreaTransfer, FormatCopy};
use pcmplug::pcm::slave::SlaveHandle;
use pcmplug::pcm::{Pcm, PcmSetup, Stream};
use pcmplug::plugins::buffer::{self, BufferCaps, Tap};
use pcmplug::plugins::copy::CopyPcm;

const FORMATS: [Format; 6] = [
    Format::U8,
    Format::S16Le,
    Format::S16Be,
    Format::S24_3Le,
    Format::S32Le,
    Format::FloatLe,
];

fn stacked(caps: BufferCaps, tap: Tap) -> Pcm {
    let slave = buffer::open("hw", Stream::Playback, OpenMode::BLOCK, caps, tap).unwrap();
    CopyPcm::open("copy", SlaveHandle::owned(slave), Stream::Playback, OpenMode::BLOCK).unwrap()
}

fn setup_for(format: Format, channels: u32) -> PcmSetup {
    PcmSetup {
        access: Access::RwInterleaved,
        format,
        channels,
        rate: 48000,
        period_size: 16,
        periods: 2,
        buffer_size: 32,
        sample_bits: format.width(),
        frame_bits: format.physical_width() * channels,
    }
}

fn caps_strategy() -> impl Strategy<Value = BufferCaps> {
    (
        prop::sample::subsequence(FORMATS.to_vec(), 1..=FORMATS.len()),
        1u32..4,
        0u32..4,
        8000u32..48000,
        0u32..48000,
    )
        .prop_map(|(formats, ch_min, ch_span, rate_min, rate_span)| {
            BufferCaps::default()
                .with_formats(&formats)
                .with_channels(Interval::new(ch_min, ch_min + ch_span))
                .with_rate(Interval::new(rate_min, rate_min + rate_span))
        })
}

fn request_strategy() -> impl Strategy<Value = HwParams> {
    (
        prop::option::of(prop::sample::select(FORMATS.to_vec())),
        prop::option::of(1u32..8),
        prop::option::of(4000u32..96000),
        prop::option::of(8u32..512),
    )
        .prop_map(|(format, channels, rate, period)| {
            let mut params = HwParams::any();
            params.set_max(ParamKind::BufferSize, 4096).unwrap();
            if let Some(format) = format {
                params.set_format(format).unwrap();
            }
            if let Some(channels) = channels {
                params.set_channels(channels).unwrap();
            }
            if let Some(rate) = rate {
                params.set_min(ParamKind::Rate, rate).unwrap();
            }
            if let Some(period) = period {
                params.set_period_size(period).unwrap();
            }
            params
        })
}

proptest! {
    #[test]
    fn prop_refine_is_monotone_and_idempotent(
        caps in caps_strategy(),
        request in request_strategy(),
    ) {
        let mut pcm = stacked(caps, Tap::new());
        let mut refined = request.clone();
        match pcm.hw_refine(&mut refined) {
            Ok(()) => {
                prop_assert!(refined.is_subset_of(&request));
                let mut again = refined.clone();
                pcm.hw_refine(&mut again).unwrap();
                prop_assert!(again.same_constraints(&refined));
            }
            Err(err) => {
                prop_assert!(matches!(err, Error::IncompatibleParams(_)), "{:?}", err);
            }
        }
    }

    #[test]
    fn prop_committed_params_fit_device(
        caps in caps_strategy(),
        request in request_strategy(),
    ) {
        let mut pcm = stacked(caps.clone(), Tap::new());
        let mut params = request.clone();
        if pcm.hw_params(&mut params).is_ok() {
            let setup = *pcm.setup().unwrap();
            prop_assert!(params.is_single());
            prop_assert!(caps.formats.as_ref().unwrap().contains(&setup.format));
            prop_assert!(caps.rate.unwrap().contains(setup.rate));
            prop_assert!(caps.channels.unwrap().contains(setup.channels));
            prop_assert_eq!(setup.buffer_size, setup.period_size * setup.periods);
            prop_assert_eq!(setup.frame_bits, setup.format.physical_width() * setup.channels);
        }
    }

    #[test]
    fn prop_playback_conserves_frames(
        format in prop::sample::select(FORMATS.to_vec()),
        channels in 1u32..4,
        period in 8u32..64,
        periods in 2u32..5,
        frames in 0usize..700,
        seed in any::<u8>(),
    ) {
        let tap = Tap::new();
        let mut pcm = stacked(BufferCaps::default(), tap.clone());
        let mut params = HwParams::any();
        params.set_access(Access::RwInterleaved).unwrap();
        params.set_format(format).unwrap();
        params.set_channels(channels).unwrap();
        params.set_rate(44100).unwrap();
        params.set_period_size(period).unwrap();
        params.set_periods(periods).unwrap();
        pcm.hw_params(&mut params).unwrap();

        let frame_bytes = pcm.setup().unwrap().frame_bytes();
        let data: Vec<u8> = (0..frames * frame_bytes)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect();
        prop_assert_eq!(pcm.writei(&data, frames).unwrap(), frames);
        prop_assert_eq!(tap.recorded(), data);
        prop_assert_eq!(tap.frames_recorded(), frames);
    }

    #[test]
    fn prop_planar_round_trip(
        format in prop::sample::select(FORMATS.to_vec()),
        channels in 1usize..6,
        frames in 0usize..64,
    ) {
        let bytes = frames * channels * format.bytes();
        let source: Vec<u8> = (0..bytes).map(|i| (i % 253) as u8).collect();
        let mut planar = vec![0u8; bytes];
        let mut back = vec![0u8; bytes];

        {
            let src = Areas::interleaved(&source, channels, format);
            let mut dst = AreasMut::new(vec![&mut planar[..]], planar_layout(channels, frames, format));
            areas_copy(&mut dst, 0, &src, 0, channels, frames, format);
        }
        {
            let src = Areas::new(vec![&planar[..]], planar_layout(channels, frames, format));
            let mut dst = AreasMut::interleaved(&mut back, channels, format);
            areas_copy(&mut dst, 0, &src, 0, channels, frames, format);
        }
        prop_assert_eq!(back, source);
    }

    #[test]
    fn prop_format_copy_stays_in_window(
        format in prop::sample::select(FORMATS.to_vec()),
        channels in 1u32..4,
        offset in 0usize..16,
        slave_offset in 0usize..16,
        size in 0usize..16,
        capacity in 0usize..16,
        outbound in any::<bool>(),
    ) {
        let setup = setup_for(format, channels);
        let frame_bytes = setup.frame_bytes();
        let frames = 40;
        let source: Vec<u8> = (0..frames * frame_bytes).map(|i| (i % 251) as u8).collect();
        let mut target = vec![0xaau8; frames * frame_bytes];
        let (src_offset, dst_offset) = if outbound {
            (offset, slave_offset)
        } else {
            (slave_offset, offset)
        };

        let mut slave_size = capacity;
        let moved = {
            let src = Areas::interleaved(&source, channels as usize, format);
            let mut dst = AreasMut::interleaved(&mut target, channels as usize, format);
            if outbound {
                FormatCopy.transfer_out(&setup, &src, offset, size, &mut dst, slave_offset, &mut slave_size)
            } else {
                FormatCopy.transfer_in(&setup, &mut dst, offset, size, &src, slave_offset, &mut slave_size)
            }
        };

        prop_assert_eq!(moved, size.min(capacity));
        prop_assert_eq!(slave_size, moved);
        let start = dst_offset * frame_bytes;
        let end = start + moved * frame_bytes;
        prop_assert!(target[..start].iter().all(|&b| b == 0xaa));
        prop_assert_eq!(
            &target[start..end],
            &source[src_offset * frame_bytes..src_offset * frame_bytes + moved * frame_bytes]
        );
        prop_assert!(target[end..].iter().all(|&b| b == 0xaa));
    }
}
