//! Sample formats
//!
//! Discriminants follow the classic PCM numbering so that format masks are
//! stable across builds and can be exchanged with dynamically loaded plugins.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, Error};

/// Sample format of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Format {
    S8 = 0,
    U8 = 1,
    S16Le = 2,
    S16Be = 3,
    U16Le = 4,
    U16Be = 5,
    S24Le = 6,
    S24Be = 7,
    U24Le = 8,
    U24Be = 9,
    S32Le = 10,
    S32Be = 11,
    U32Le = 12,
    U32Be = 13,
    FloatLe = 14,
    FloatBe = 15,
    Float64Le = 16,
    Float64Be = 17,
    MuLaw = 20,
    ALaw = 21,
    S24_3Le = 32,
    S24_3Be = 33,
    U24_3Le = 34,
    U24_3Be = 35,
    S20_3Le = 36,
    S20_3Be = 37,
    S18_3Le = 40,
    S18_3Be = 41,
}

const ALL: [Format; 28] = [
    Format::S8,
    Format::U8,
    Format::S16Le,
    Format::S16Be,
    Format::U16Le,
    Format::U16Be,
    Format::S24Le,
    Format::S24Be,
    Format::U24Le,
    Format::U24Be,
    Format::S32Le,
    Format::S32Be,
    Format::U32Le,
    Format::U32Be,
    Format::FloatLe,
    Format::FloatBe,
    Format::Float64Le,
    Format::Float64Be,
    Format::MuLaw,
    Format::ALaw,
    Format::S24_3Le,
    Format::S24_3Be,
    Format::U24_3Le,
    Format::U24_3Be,
    Format::S20_3Le,
    Format::S20_3Be,
    Format::S18_3Le,
    Format::S18_3Be,
];

impl Format {
    /// All known formats in index order
    pub fn all() -> &'static [Format] {
        &ALL
    }

    /// Mask bit index of this format
    pub fn index(self) -> u32 {
        self as u32
    }

    /// Format for a mask bit index
    pub fn from_index(index: u32) -> Option<Format> {
        ALL.iter().copied().find(|f| f.index() == index)
    }

    /// Canonical name, e.g. `S16_LE`
    pub fn name(self) -> &'static str {
        match self {
            Format::S8 => "S8",
            Format::U8 => "U8",
            Format::S16Le => "S16_LE",
            Format::S16Be => "S16_BE",
            Format::U16Le => "U16_LE",
            Format::U16Be => "U16_BE",
            Format::S24Le => "S24_LE",
            Format::S24Be => "S24_BE",
            Format::U24Le => "U24_LE",
            Format::U24Be => "U24_BE",
            Format::S32Le => "S32_LE",
            Format::S32Be => "S32_BE",
            Format::U32Le => "U32_LE",
            Format::U32Be => "U32_BE",
            Format::FloatLe => "FLOAT_LE",
            Format::FloatBe => "FLOAT_BE",
            Format::Float64Le => "FLOAT64_LE",
            Format::Float64Be => "FLOAT64_BE",
            Format::MuLaw => "MU_LAW",
            Format::ALaw => "A_LAW",
            Format::S24_3Le => "S24_3LE",
            Format::S24_3Be => "S24_3BE",
            Format::U24_3Le => "U24_3LE",
            Format::U24_3Be => "U24_3BE",
            Format::S20_3Le => "S20_3LE",
            Format::S20_3Be => "S20_3BE",
            Format::S18_3Le => "S18_3LE",
            Format::S18_3Be => "S18_3BE",
        }
    }

    /// Bits occupied by one sample in memory
    pub fn physical_width(self) -> u32 {
        match self {
            Format::S8 | Format::U8 | Format::MuLaw | Format::ALaw => 8,
            Format::S16Le | Format::S16Be | Format::U16Le | Format::U16Be => 16,
            Format::S24_3Le
            | Format::S24_3Be
            | Format::U24_3Le
            | Format::U24_3Be
            | Format::S20_3Le
            | Format::S20_3Be
            | Format::S18_3Le
            | Format::S18_3Be => 24,
            Format::S24Le
            | Format::S24Be
            | Format::U24Le
            | Format::U24Be
            | Format::S32Le
            | Format::S32Be
            | Format::U32Le
            | Format::U32Be
            | Format::FloatLe
            | Format::FloatBe => 32,
            Format::Float64Le | Format::Float64Be => 64,
        }
    }

    /// Significant bits per sample
    pub fn width(self) -> u32 {
        match self {
            Format::S24Le | Format::S24Be | Format::U24Le | Format::U24Be => 24,
            Format::S20_3Le | Format::S20_3Be => 20,
            Format::S18_3Le | Format::S18_3Be => 18,
            other => other.physical_width(),
        }
    }

    /// Bytes occupied by one sample
    pub fn bytes(self) -> usize {
        (self.physical_width() / 8) as usize
    }

    pub fn is_signed(self) -> bool {
        !matches!(
            self,
            Format::U8
                | Format::U16Le
                | Format::U16Be
                | Format::U24Le
                | Format::U24Be
                | Format::U32Le
                | Format::U32Be
                | Format::U24_3Le
                | Format::U24_3Be
                | Format::MuLaw
                | Format::ALaw
        )
    }

    pub fn is_little_endian(self) -> bool {
        !matches!(
            self,
            Format::S16Be
                | Format::U16Be
                | Format::S24Be
                | Format::U24Be
                | Format::S32Be
                | Format::U32Be
                | Format::FloatBe
                | Format::Float64Be
                | Format::S24_3Be
                | Format::U24_3Be
                | Format::S20_3Be
                | Format::S18_3Be
        )
    }

    /// Byte pattern of one silent sample
    pub fn silence(self) -> Vec<u8> {
        let mut sample = vec![0u8; self.bytes()];
        match self {
            Format::MuLaw => sample[0] = 0xff,
            Format::ALaw => sample[0] = 0x55,
            f if !f.is_signed() => {
                // Midpoint: only the most significant bit of the value is set
                let msb_bit = f.width() - 1;
                let byte_in_value = (msb_bit / 8) as usize;
                let byte = if f.is_little_endian() {
                    byte_in_value
                } else {
                    f.bytes() - 1 - byte_in_value
                };
                sample[byte] = 1 << (msb_bit % 8);
            }
            _ => {}
        }
        sample
    }

    /// Native-endian alias resolution for names such as `S16`
    fn native(le: Format, be: Format) -> Format {
        if cfg!(target_endian = "little") {
            le
        } else {
            be
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = Error;

    /// Case-insensitive lookup; `S16`, `S24`, `S32`, `U16`, `FLOAT` etc. map
    /// to the host-endian variant.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        let alias = match upper.as_str() {
            "S16" => Some(Format::native(Format::S16Le, Format::S16Be)),
            "U16" => Some(Format::native(Format::U16Le, Format::U16Be)),
            "S24" => Some(Format::native(Format::S24Le, Format::S24Be)),
            "U24" => Some(Format::native(Format::U24Le, Format::U24Be)),
            "S32" => Some(Format::native(Format::S32Le, Format::S32Be)),
            "U32" => Some(Format::native(Format::U32Le, Format::U32Be)),
            "FLOAT" => Some(Format::native(Format::FloatLe, Format::FloatBe)),
            "FLOAT64" => Some(Format::native(Format::Float64Le, Format::Float64Be)),
            _ => None,
        };
        if let Some(format) = alias {
            return Ok(format);
        }
        ALL.iter()
            .copied()
            .find(|f| f.name() == upper)
            .ok_or_else(|| {
                Error::Config(ConfigError::InvalidValue {
                    field: "format".to_string(),
                    value: s.to_string(),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names_and_aliases() {
        assert_eq!("S16_LE".parse::<Format>().unwrap(), Format::S16Le);
        assert_eq!("s24_3le".parse::<Format>().unwrap(), Format::S24_3Le);
        assert_eq!("FLOAT64_BE".parse::<Format>().unwrap(), Format::Float64Be);
        if cfg!(target_endian = "little") {
            assert_eq!("S32".parse::<Format>().unwrap(), Format::S32Le);
        }
        assert!("S17".parse::<Format>().is_err());
    }

    #[test]
    fn test_index_roundtrip_is_stable() {
        for format in Format::all() {
            assert_eq!(Format::from_index(format.index()), Some(*format));
        }
        assert_eq!(Format::from_index(18), None);
        assert_eq!(Format::S32Le.index(), 10);
    }

    #[test]
    fn test_widths() {
        assert_eq!(Format::S24Le.physical_width(), 32);
        assert_eq!(Format::S24Le.width(), 24);
        assert_eq!(Format::S24_3Be.bytes(), 3);
        assert_eq!(Format::Float64Le.bytes(), 8);
    }

    #[test]
    fn test_silence_patterns() {
        assert_eq!(Format::S16Le.silence(), vec![0, 0]);
        assert_eq!(Format::U8.silence(), vec![0x80]);
        assert_eq!(Format::U16Le.silence(), vec![0x00, 0x80]);
        assert_eq!(Format::U16Be.silence(), vec![0x80, 0x00]);
        assert_eq!(Format::U24Le.silence(), vec![0x00, 0x00, 0x80, 0x00]);
        assert_eq!(Format::U24Be.silence(), vec![0x00, 0x80, 0x00, 0x00]);
        assert_eq!(Format::MuLaw.silence(), vec![0xff]);
    }
}
