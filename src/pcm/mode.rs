//! Open mode flags and the signed-token flag parser
//!
//! Flag lists arrive as ordered tokens such as `["nonblock", "!async"]`.
//! Each token sets its flag, a leading `!` clears it instead, and tokens
//! are applied left to right on top of a starting value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

/// Flag word that can be built from named tokens
pub trait FlagSet:
    Copy + BitOr<Output = Self> + BitAnd<Output = Self> + Not<Output = Self>
{
}

impl<T> FlagSet for T where T: Copy + BitOr<Output = T> + BitAnd<Output = T> + Not<Output = T> {}

/// Builder applying signed tokens against a static name table
pub struct FlagParser<'t, F: FlagSet> {
    table: &'t [(&'static str, F)],
    value: F,
}

impl<'t, F: FlagSet> FlagParser<'t, F> {
    pub fn new(table: &'t [(&'static str, F)], initial: F) -> Self {
        Self {
            table,
            value: initial,
        }
    }

    /// Apply one token; unknown names are reported and skipped
    pub fn apply(mut self, token: &str) -> Self {
        let (invert, key) = match token.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        match self.table.iter().find(|(name, _)| *name == key) {
            Some((_, flag)) => {
                self.value = if invert {
                    self.value & !*flag
                } else {
                    self.value | *flag
                };
            }
            None => tracing::warn!("Unknown flag {}", key),
        }
        self
    }

    pub fn apply_all<'a>(self, tokens: impl IntoIterator<Item = &'a str>) -> Self {
        tokens.into_iter().fold(self, |parser, token| parser.apply(token))
    }

    pub fn build(self) -> F {
        self.value
    }
}

/// PCM open mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpenMode(u32);

impl OpenMode {
    pub const BLOCK: OpenMode = OpenMode(0);
    pub const NONBLOCK: OpenMode = OpenMode(0x0001);
    pub const ASYNC: OpenMode = OpenMode(0x0002);

    const NAMES: [(&'static str, OpenMode); 2] =
        [("nonblock", OpenMode::NONBLOCK), ("async", OpenMode::ASYNC)];

    /// Build a mode from signed tokens on top of blocking mode
    pub fn from_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        FlagParser::new(&Self::NAMES, OpenMode::BLOCK)
            .apply_all(tokens)
            .build()
    }

    /// Apply signed tokens on top of an existing mode
    pub fn apply_tokens<'a>(base: OpenMode, tokens: impl IntoIterator<Item = &'a str>) -> Self {
        FlagParser::new(&Self::NAMES, base).apply_all(tokens).build()
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: OpenMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_nonblock(self) -> bool {
        self.contains(OpenMode::NONBLOCK)
    }

    pub fn is_async(self) -> bool {
        self.contains(OpenMode::ASYNC)
    }

    pub fn with(self, other: OpenMode, on: bool) -> Self {
        if on {
            self | other
        } else {
            self & !other
        }
    }
}

impl BitOr for OpenMode {
    type Output = OpenMode;

    fn bitor(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 | rhs.0)
    }
}

impl BitAnd for OpenMode {
    type Output = OpenMode;

    fn bitand(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 & rhs.0)
    }
}

impl Not for OpenMode {
    type Output = OpenMode;

    fn not(self) -> OpenMode {
        OpenMode(!self.0)
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("block")
        } else {
            f.write_str(&names.join(" "))
        }
    }
}
