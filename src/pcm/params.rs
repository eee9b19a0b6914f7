//! Hardware parameter sets
//!
//! A [`HwParams`] maps every [`ParamKind`] to a constraint: a bit [`Mask`]
//! for enumerated kinds (access, format, subformat) or an integer [`Interval`] for
//! numeric kinds. Constraints only ever shrink; a kind whose constraint
//! becomes empty makes the whole set unsatisfiable.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::pcm::format::Format;

/// Negotiable PCM attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamKind {
    Access,
    Format,
    Subformat,
    SampleBits,
    FrameBits,
    Channels,
    Rate,
    PeriodSize,
    Periods,
    BufferSize,
}

impl ParamKind {
    pub const ALL: [ParamKind; 10] = [
        ParamKind::Access,
        ParamKind::Format,
        ParamKind::Subformat,
        ParamKind::SampleBits,
        ParamKind::FrameBits,
        ParamKind::Channels,
        ParamKind::Rate,
        ParamKind::PeriodSize,
        ParamKind::Periods,
        ParamKind::BufferSize,
    ];

    pub fn is_mask(self) -> bool {
        matches!(
            self,
            ParamKind::Access | ParamKind::Format | ParamKind::Subformat
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamKind::Access => "ACCESS",
            ParamKind::Format => "FORMAT",
            ParamKind::Subformat => "SUBFORMAT",
            ParamKind::SampleBits => "SAMPLE_BITS",
            ParamKind::FrameBits => "FRAME_BITS",
            ParamKind::Channels => "CHANNELS",
            ParamKind::Rate => "RATE",
            ParamKind::PeriodSize => "PERIOD_SIZE",
            ParamKind::Periods => "PERIODS",
            ParamKind::BufferSize => "BUFFER_SIZE",
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u32)
    }

    fn interval_index(self) -> usize {
        self as usize - 3
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Set of parameter kinds, used for refinement links and change tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamMask(u32);

impl ParamMask {
    pub const NONE: ParamMask = ParamMask(0);
    pub const ALL: ParamMask = ParamMask((1 << 10) - 1);

    pub fn only(kind: ParamKind) -> Self {
        ParamMask(kind.bit())
    }

    /// This set minus `kind`
    pub fn without(self, kind: ParamKind) -> Self {
        ParamMask(self.0 & !kind.bit())
    }

    pub fn with(self, kind: ParamKind) -> Self {
        ParamMask(self.0 | kind.bit())
    }

    pub fn contains(self, kind: ParamKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: ParamMask) -> Self {
        ParamMask(self.0 | other.0)
    }

    pub fn kinds(self) -> impl Iterator<Item = ParamKind> {
        ParamKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

/// Transfer method of a PCM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Access {
    MmapInterleaved = 0,
    MmapNonInterleaved = 1,
    MmapComplex = 2,
    RwInterleaved = 3,
    RwNonInterleaved = 4,
}

impl Access {
    pub const ALL: [Access; 5] = [
        Access::MmapInterleaved,
        Access::MmapNonInterleaved,
        Access::MmapComplex,
        Access::RwInterleaved,
        Access::RwNonInterleaved,
    ];

    pub fn from_index(index: u32) -> Option<Access> {
        Access::ALL.into_iter().find(|a| *a as u32 == index)
    }

    pub fn name(self) -> &'static str {
        match self {
            Access::MmapInterleaved => "MMAP_INTERLEAVED",
            Access::MmapNonInterleaved => "MMAP_NONINTERLEAVED",
            Access::MmapComplex => "MMAP_COMPLEX",
            Access::RwInterleaved => "RW_INTERLEAVED",
            Access::RwNonInterleaved => "RW_NONINTERLEAVED",
        }
    }

    pub fn is_interleaved(self) -> bool {
        matches!(self, Access::MmapInterleaved | Access::RwInterleaved)
    }

    pub fn is_mmap(self) -> bool {
        matches!(
            self,
            Access::MmapInterleaved | Access::MmapNonInterleaved | Access::MmapComplex
        )
    }

    /// Mask of the three memory-mapped access types
    pub fn mmap_mask() -> Mask {
        Mask::from_bits(&[
            Access::MmapInterleaved as u32,
            Access::MmapNonInterleaved as u32,
            Access::MmapComplex as u32,
        ])
    }

    /// Mask of every access type a copying plugin can serve
    pub fn shm_mask() -> Mask {
        Mask::from_bits(&[
            Access::MmapInterleaved as u32,
            Access::MmapNonInterleaved as u32,
            Access::RwInterleaved as u32,
            Access::RwNonInterleaved as u32,
        ])
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Access {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.to_ascii_uppercase();
        Access::ALL
            .into_iter()
            .find(|a| a.name() == upper)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown access type {}", s)))
    }
}

/// Sample subformat; only the standard layout exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Subformat {
    #[default]
    Std = 0,
}

impl Subformat {
    pub fn from_index(index: u32) -> Option<Subformat> {
        match index {
            0 => Some(Subformat::Std),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Subformat::Std => "STD",
        }
    }
}

/// Capability bits reported alongside a parameter set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PcmInfo(u32);

impl PcmInfo {
    pub const MMAP: PcmInfo = PcmInfo(0x0000_0001);
    pub const MMAP_VALID: PcmInfo = PcmInfo(0x0000_0002);
    pub const DOUBLE: PcmInfo = PcmInfo(0x0000_0004);
    pub const BATCH: PcmInfo = PcmInfo(0x0000_0010);
    pub const INTERLEAVED: PcmInfo = PcmInfo(0x0000_0100);
    pub const NONINTERLEAVED: PcmInfo = PcmInfo(0x0000_0200);
    pub const BLOCK_TRANSFER: PcmInfo = PcmInfo(0x0001_0000);
    pub const PAUSE: PcmInfo = PcmInfo(0x0008_0000);

    pub const fn empty() -> Self {
        PcmInfo(0)
    }

    pub const fn all() -> Self {
        PcmInfo(0x0009_0317)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: PcmInfo) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: PcmInfo) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: PcmInfo) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for PcmInfo {
    type Output = PcmInfo;

    fn bitor(self, rhs: PcmInfo) -> PcmInfo {
        PcmInfo(self.0 | rhs.0)
    }
}

/// Finite set of allowed values for an enumerated kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask(u64);

impl Mask {
    pub const ANY: Mask = Mask(u64::MAX);

    pub fn empty() -> Self {
        Mask(0)
    }

    pub fn from_bits(bits: &[u32]) -> Self {
        Mask(bits.iter().fold(0u64, |acc, b| acc | (1u64 << b)))
    }

    pub fn single(bit: u32) -> Self {
        Mask(1u64 << bit)
    }

    pub fn formats(formats: &[Format]) -> Self {
        Mask(formats.iter().fold(0u64, |acc, f| acc | (1u64 << f.index())))
    }

    pub fn test(&self, bit: u32) -> bool {
        bit < 64 && self.0 & (1u64 << bit) != 0
    }

    pub fn set(&mut self, bit: u32) {
        self.0 |= 1u64 << bit;
    }

    pub fn reset(&mut self, bit: u32) {
        self.0 &= !(1u64 << bit);
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_single(&self) -> bool {
        self.0.count_ones() == 1
    }

    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn first(&self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros())
        }
    }

    pub fn bits(&self) -> impl Iterator<Item = u32> + '_ {
        (0..64).filter(move |b| self.test(*b))
    }

    /// Intersect with `other`; returns whether this mask changed
    pub fn refine(&mut self, other: &Mask) -> bool {
        let old = self.0;
        self.0 &= other.0;
        self.0 != old
    }

    pub fn is_subset_of(&self, other: &Mask) -> bool {
        self.0 & !other.0 == 0
    }
}

/// Closed integer range `[min, max]`; empty when `min > max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub min: u32,
    pub max: u32,
}

impl Interval {
    pub const ANY: Interval = Interval { min: 0, max: u32::MAX };

    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn single(value: u32) -> Self {
        Self { min: value, max: value }
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn is_single(&self) -> bool {
        self.min == self.max
    }

    pub fn contains(&self, value: u32) -> bool {
        self.min <= value && value <= self.max
    }

    pub fn value(&self) -> Option<u32> {
        if self.is_single() {
            Some(self.min)
        } else {
            None
        }
    }

    /// Intersect with `other`; returns whether this interval changed
    pub fn refine(&mut self, other: &Interval) -> bool {
        let old = *self;
        self.min = self.min.max(other.min);
        self.max = self.max.min(other.max);
        *self != old
    }

    pub fn refine_min(&mut self, min: u32) -> bool {
        self.refine(&Interval::new(min, u32::MAX))
    }

    pub fn refine_max(&mut self, max: u32) -> bool {
        self.refine(&Interval::new(0, max))
    }

    pub fn refine_set(&mut self, value: u32) -> bool {
        self.refine(&Interval::single(value))
    }

    pub fn is_subset_of(&self, other: &Interval) -> bool {
        self.is_empty() || (other.min <= self.min && self.max <= other.max)
    }

    /// Every product `a * b` with `a` in `self`, `b` in `other`
    pub fn mul(&self, other: &Interval) -> Interval {
        Interval::new(
            self.min.saturating_mul(other.min),
            self.max.saturating_mul(other.max),
        )
    }

    /// Integer quotients `c` such that `c * b` can land in `self`
    pub fn div(&self, other: &Interval) -> Interval {
        let min = if other.max == 0 {
            0
        } else {
            div_ceil(self.min, other.max)
        };
        let max = if other.min == 0 {
            u32::MAX
        } else {
            self.max / other.min
        };
        Interval::new(min, max)
    }
}

fn div_ceil(a: u32, b: u32) -> u32 {
    a / b + u32::from(a % b != 0)
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("NONE")
        } else if self.is_single() {
            write!(f, "{}", self.min)
        } else {
            write!(f, "[{} {}]", self.min, self.max)
        }
    }
}

/// Constrained parameter space of one PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwParams {
    access: Mask,
    format: Mask,
    subformat: Mask,
    intervals: [Interval; 7],
    pub info: PcmInfo,
    cmask: ParamMask,
}

impl Default for HwParams {
    fn default() -> Self {
        Self::any()
    }
}

impl HwParams {
    /// Unconstrained parameter set
    pub fn any() -> Self {
        let mut intervals = [Interval::new(1, u32::MAX); 7];
        intervals[ParamKind::SampleBits.interval_index()] = Interval::new(1, 64);
        Self {
            access: Mask::from_bits(&[0, 1, 2, 3, 4]),
            format: Mask::formats(Format::all()),
            subformat: Mask::single(Subformat::Std as u32),
            intervals,
            info: PcmInfo::all(),
            cmask: ParamMask::ALL,
        }
    }

    /// Reset to the unconstrained baseline in place
    pub fn reset_any(&mut self) {
        *self = Self::any();
    }

    pub fn mask(&self, kind: ParamKind) -> Mask {
        match kind {
            ParamKind::Access => self.access,
            ParamKind::Format => self.format,
            ParamKind::Subformat => self.subformat,
            other => panic!("{} is not a mask parameter", other),
        }
    }

    pub fn interval(&self, kind: ParamKind) -> Interval {
        assert!(!kind.is_mask(), "{} is not an interval parameter", kind);
        self.intervals[kind.interval_index()]
    }

    fn mask_mut(&mut self, kind: ParamKind) -> &mut Mask {
        match kind {
            ParamKind::Access => &mut self.access,
            ParamKind::Subformat => &mut self.subformat,
            _ => &mut self.format,
        }
    }

    /// Kinds changed since the last [`HwParams::take_cmask`]
    pub fn cmask(&self) -> ParamMask {
        self.cmask
    }

    pub fn take_cmask(&mut self) -> ParamMask {
        std::mem::take(&mut self.cmask)
    }

    pub fn merge_cmask(&mut self, mask: ParamMask) {
        self.cmask = self.cmask.union(mask);
    }

    fn note(&mut self, kind: ParamKind, changed: bool) -> Result<bool> {
        let empty = if kind.is_mask() {
            self.mask(kind).is_empty()
        } else {
            self.interval(kind).is_empty()
        };
        if empty {
            return Err(Error::IncompatibleParams(kind));
        }
        if changed {
            self.cmask = self.cmask.with(kind);
        }
        Ok(changed)
    }

    /// Intersect the mask of `kind` with `mask`
    pub fn refine_mask(&mut self, kind: ParamKind, mask: &Mask) -> Result<bool> {
        let changed = self.mask_mut(kind).refine(mask);
        self.note(kind, changed)
    }

    /// Intersect the interval of `kind` with `interval`
    pub fn refine_interval(&mut self, kind: ParamKind, interval: &Interval) -> Result<bool> {
        let changed = self.intervals[kind.interval_index()].refine(interval);
        self.note(kind, changed)
    }

    pub fn set_access(&mut self, access: Access) -> Result<bool> {
        self.refine_mask(ParamKind::Access, &Mask::single(access as u32))
    }

    pub fn set_format(&mut self, format: Format) -> Result<bool> {
        self.refine_mask(ParamKind::Format, &Mask::single(format.index()))
    }

    pub fn set_value(&mut self, kind: ParamKind, value: u32) -> Result<bool> {
        self.refine_interval(kind, &Interval::single(value))
    }

    pub fn set_min(&mut self, kind: ParamKind, min: u32) -> Result<bool> {
        self.refine_interval(kind, &Interval::new(min, u32::MAX))
    }

    pub fn set_max(&mut self, kind: ParamKind, max: u32) -> Result<bool> {
        self.refine_interval(kind, &Interval::new(0, max))
    }

    pub fn set_channels(&mut self, channels: u32) -> Result<bool> {
        self.set_value(ParamKind::Channels, channels)
    }

    pub fn set_rate(&mut self, rate: u32) -> Result<bool> {
        self.set_value(ParamKind::Rate, rate)
    }

    pub fn set_period_size(&mut self, frames: u32) -> Result<bool> {
        self.set_value(ParamKind::PeriodSize, frames)
    }

    pub fn set_periods(&mut self, periods: u32) -> Result<bool> {
        self.set_value(ParamKind::Periods, periods)
    }

    pub fn set_buffer_size(&mut self, frames: u32) -> Result<bool> {
        self.set_value(ParamKind::BufferSize, frames)
    }

    /// Allowed access types
    pub fn access_mask(&self) -> Mask {
        self.access
    }

    /// Allowed formats
    pub fn format_mask(&self) -> Mask {
        self.format
    }

    /// The single negotiated format
    pub fn format(&self) -> Result<Format> {
        if !self.format.is_single() {
            return Err(Error::Unresolved(ParamKind::Format));
        }
        self.format
            .first()
            .and_then(Format::from_index)
            .ok_or(Error::IncompatibleParams(ParamKind::Format))
    }

    /// The single negotiated subformat
    pub fn subformat(&self) -> Result<Subformat> {
        if !self.subformat.is_single() {
            return Err(Error::Unresolved(ParamKind::Subformat));
        }
        self.subformat
            .first()
            .and_then(Subformat::from_index)
            .ok_or(Error::IncompatibleParams(ParamKind::Subformat))
    }

    /// The single negotiated access type
    pub fn access(&self) -> Result<Access> {
        if !self.access.is_single() {
            return Err(Error::Unresolved(ParamKind::Access));
        }
        self.access
            .first()
            .and_then(Access::from_index)
            .ok_or(Error::IncompatibleParams(ParamKind::Access))
    }

    /// The single value of an interval kind
    pub fn value(&self, kind: ParamKind) -> Result<u32> {
        self.interval(kind).value().ok_or(Error::Unresolved(kind))
    }

    pub fn channels(&self) -> Result<u32> {
        self.value(ParamKind::Channels)
    }

    pub fn rate(&self) -> Result<u32> {
        self.value(ParamKind::Rate)
    }

    pub fn period_size(&self) -> Result<u32> {
        self.value(ParamKind::PeriodSize)
    }

    pub fn buffer_size(&self) -> Result<u32> {
        self.value(ParamKind::BufferSize)
    }

    /// Copy constraints of the `links` kinds from `other` into `self`
    pub fn refine_from(&mut self, other: &HwParams, links: ParamMask) -> Result<bool> {
        let mut changed = false;
        for kind in links.kinds() {
            changed |= if kind.is_mask() {
                self.refine_mask(kind, &other.mask(kind))?
            } else {
                self.refine_interval(kind, &other.interval(kind))?
            };
        }
        if self.info != other.info {
            let info = PcmInfo(self.info.bits() & other.info.bits());
            self.info = info;
        }
        Ok(changed)
    }

    /// Apply the dependency rules between kinds until nothing changes
    pub fn refine_soft(&mut self) -> Result<bool> {
        let mut any_change = false;
        loop {
            let mut changed = false;

            // SAMPLE_BITS <-> FORMAT
            let (lo, hi) = self
                .format
                .bits()
                .filter_map(Format::from_index)
                .fold((u32::MAX, 0), |(lo, hi), f| {
                    (lo.min(f.physical_width()), hi.max(f.physical_width()))
                });
            changed |= self.refine_interval(ParamKind::SampleBits, &Interval::new(lo, hi))?;
            let bits = self.interval(ParamKind::SampleBits);
            let fitting: Vec<Format> = self
                .format
                .bits()
                .filter_map(Format::from_index)
                .filter(|f| bits.contains(f.physical_width()))
                .collect();
            changed |= self.refine_mask(ParamKind::Format, &Mask::formats(&fitting))?;

            // FRAME_BITS = SAMPLE_BITS * CHANNELS
            let sample_bits = self.interval(ParamKind::SampleBits);
            let channels = self.interval(ParamKind::Channels);
            changed |=
                self.refine_interval(ParamKind::FrameBits, &sample_bits.mul(&channels))?;
            let frame_bits = self.interval(ParamKind::FrameBits);
            changed |= self.refine_interval(ParamKind::Channels, &frame_bits.div(&sample_bits))?;
            let channels = self.interval(ParamKind::Channels);
            changed |= self.refine_interval(ParamKind::SampleBits, &frame_bits.div(&channels))?;

            // BUFFER_SIZE = PERIOD_SIZE * PERIODS
            let period_size = self.interval(ParamKind::PeriodSize);
            let periods = self.interval(ParamKind::Periods);
            changed |=
                self.refine_interval(ParamKind::BufferSize, &period_size.mul(&periods))?;
            let buffer_size = self.interval(ParamKind::BufferSize);
            changed |= self.refine_interval(ParamKind::PeriodSize, &buffer_size.div(&periods))?;
            let period_size = self.interval(ParamKind::PeriodSize);
            changed |= self.refine_interval(ParamKind::Periods, &buffer_size.div(&period_size))?;

            if !changed {
                break;
            }
            any_change = true;
        }
        Ok(any_change)
    }

    /// Whether every constraint of `self` lies within `other`
    pub fn is_subset_of(&self, other: &HwParams) -> bool {
        self.access.is_subset_of(&other.access)
            && self.format.is_subset_of(&other.format)
            && self.subformat.is_subset_of(&other.subformat)
            && self
                .intervals
                .iter()
                .zip(other.intervals.iter())
                .all(|(a, b)| a.is_subset_of(b))
    }

    /// Same constraints, ignoring change tracking
    pub fn same_constraints(&self, other: &HwParams) -> bool {
        self.access == other.access
            && self.format == other.format
            && self.subformat == other.subformat
            && self.intervals == other.intervals
    }

    /// First kind that still admits more than one value
    pub fn first_unresolved(&self) -> Option<ParamKind> {
        ParamKind::ALL.into_iter().find(|kind| {
            if kind.is_mask() {
                !self.mask(*kind).is_single()
            } else {
                !self.interval(*kind).is_single()
            }
        })
    }

    pub fn is_single(&self) -> bool {
        self.first_unresolved().is_none()
    }

    /// Install a single value for every kind.
    ///
    /// Masks take their first value, intervals their minimum, except the
    /// buffer size which takes its maximum; periods then take the smallest
    /// count that divides the chosen buffer size.
    pub fn choose(&mut self) -> Result<()> {
        self.refine_soft()?;
        for kind in [ParamKind::Access, ParamKind::Format, ParamKind::Subformat] {
            let first = self.mask(kind).first().ok_or(Error::IncompatibleParams(kind))?;
            self.refine_mask(kind, &Mask::single(first))?;
            self.refine_soft()?;
        }
        for kind in [ParamKind::Channels, ParamKind::Rate] {
            let min = self.interval(kind).min;
            self.set_value(kind, min)?;
            self.refine_soft()?;
        }
        let buffer_size = self.interval(ParamKind::BufferSize).max;
        self.set_value(ParamKind::BufferSize, buffer_size)?;
        self.refine_soft()?;

        let periods = self.interval(ParamKind::Periods);
        let period_size = self.interval(ParamKind::PeriodSize);
        let chosen = (periods.min..=periods.max.min(buffer_size))
            .find(|p| *p > 0 && buffer_size % p == 0 && period_size.contains(buffer_size / p))
            .ok_or(Error::IncompatibleParams(ParamKind::Periods))?;
        self.set_value(ParamKind::Periods, chosen)?;
        self.refine_soft()?;

        match self.first_unresolved() {
            Some(kind) => Err(Error::Unresolved(kind)),
            None => Ok(()),
        }
    }
}

impl fmt::Display for HwParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for kind in ParamKind::ALL {
            write!(f, "{:<12}: ", kind.name())?;
            match kind {
                ParamKind::Access => {
                    let names: Vec<&str> = self
                        .access
                        .bits()
                        .filter_map(Access::from_index)
                        .map(Access::name)
                        .collect();
                    writeln!(f, "{}", names.join(" "))?;
                }
                ParamKind::Format => {
                    let names: Vec<&str> = self
                        .format
                        .bits()
                        .filter_map(Format::from_index)
                        .map(Format::name)
                        .collect();
                    writeln!(f, "{}", names.join(" "))?;
                }
                ParamKind::Subformat => {
                    let names: Vec<&str> = self
                        .subformat
                        .bits()
                        .filter_map(Subformat::from_index)
                        .map(Subformat::name)
                        .collect();
                    writeln!(f, "{}", names.join(" "))?;
                }
                other => writeln!(f, "{}", self.interval(other))?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_refine() {
        let mut mask = Mask::formats(&[Format::S16Le, Format::S32Le]);
        assert!(!mask.refine(&Mask::ANY));
        assert!(mask.refine(&Mask::single(Format::S32Le.index())));
        assert!(mask.is_single());
        assert_eq!(mask.first(), Some(Format::S32Le.index()));
    }

    #[test]
    fn test_interval_div_mul() {
        let buffer = Interval::new(1024, 4096);
        let periods = Interval::new(2, 4);
        assert_eq!(buffer.div(&periods), Interval::new(256, 2048));
        assert_eq!(periods.mul(&Interval::single(256)), Interval::new(512, 1024));
        assert_eq!(Interval::new(7, 7).div(&Interval::new(2, 2)), Interval::new(4, 3));
    }

    #[test]
    fn test_empty_constraint_fails() {
        let mut params = HwParams::any();
        params.set_rate(48000).unwrap();
        let err = params.set_rate(44100).unwrap_err();
        assert!(matches!(err, Error::IncompatibleParams(ParamKind::Rate)));
    }

    #[test]
    fn test_refine_soft_derives_bits() {
        let mut params = HwParams::any();
        params.set_format(Format::S16Le).unwrap();
        params.set_channels(2).unwrap();
        params.refine_soft().unwrap();
        assert_eq!(params.value(ParamKind::SampleBits).unwrap(), 16);
        assert_eq!(params.value(ParamKind::FrameBits).unwrap(), 32);
    }

    #[test]
    fn test_refine_soft_buffer_relation() {
        let mut params = HwParams::any();
        params.set_period_size(256).unwrap();
        params.set_periods(4).unwrap();
        params.refine_soft().unwrap();
        assert_eq!(params.buffer_size().unwrap(), 1024);
    }

    #[test]
    fn test_refine_from_respects_links() {
        let mut device = HwParams::any();
        device.set_access(Access::RwInterleaved).unwrap();
        device.set_rate(44100).unwrap();

        let mut slave = HwParams::any();
        slave
            .refine_mask(ParamKind::Access, &Access::mmap_mask())
            .unwrap();
        slave
            .refine_from(&device, ParamMask::ALL.without(ParamKind::Access))
            .unwrap();

        assert_eq!(slave.rate().unwrap(), 44100);
        assert_eq!(slave.access_mask(), Access::mmap_mask());
    }

    #[test]
    fn test_choose_resolves_everything() {
        let mut params = HwParams::any();
        params.set_format(Format::S16Le).unwrap();
        params.set_channels(2).unwrap();
        params.set_rate(48000).unwrap();
        params.set_max(ParamKind::BufferSize, 4096).unwrap();
        params.refine_interval(ParamKind::Periods, &Interval::new(2, 8)).unwrap();
        params.choose().unwrap();

        assert!(params.is_single());
        assert_eq!(params.buffer_size().unwrap(), 4096);
        assert_eq!(params.value(ParamKind::Periods).unwrap(), 2);
        assert_eq!(params.period_size().unwrap(), 2048);
    }

    #[test]
    fn test_subformat_is_standard_mask() {
        let mut params = HwParams::any();
        assert!(ParamKind::Subformat.is_mask());
        assert!(ParamMask::ALL.contains(ParamKind::Subformat));
        assert_eq!(params.subformat().unwrap(), Subformat::Std);

        let err = params
            .refine_mask(ParamKind::Subformat, &Mask::single(1))
            .unwrap_err();
        assert!(matches!(err, Error::IncompatibleParams(ParamKind::Subformat)));
        assert!(HwParams::any().to_string().contains("SUBFORMAT   : STD"));
    }

    #[test]
    fn test_display_lists_formats() {
        let mut params = HwParams::any();
        params.set_format(Format::S24Le).unwrap();
        let text = params.to_string();
        assert!(text.contains("FORMAT      : S24_LE"));
    }
}
