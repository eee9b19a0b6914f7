//! Channel maps

use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker position of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelPosition {
    Unknown,
    NotAvailable,
    Mono,
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
    FrontCenter,
    Lfe,
    SideLeft,
    SideRight,
    RearCenter,
}

impl ChannelPosition {
    pub fn short_name(self) -> &'static str {
        match self {
            ChannelPosition::Unknown => "UNKNOWN",
            ChannelPosition::NotAvailable => "NA",
            ChannelPosition::Mono => "MONO",
            ChannelPosition::FrontLeft => "FL",
            ChannelPosition::FrontRight => "FR",
            ChannelPosition::RearLeft => "RL",
            ChannelPosition::RearRight => "RR",
            ChannelPosition::FrontCenter => "FC",
            ChannelPosition::Lfe => "LFE",
            ChannelPosition::SideLeft => "SL",
            ChannelPosition::SideRight => "SR",
            ChannelPosition::RearCenter => "RC",
        }
    }
}

/// How a queried map may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChmapType {
    /// Exactly this order
    Fixed,
    /// Any permutation
    Var,
    /// Pairwise swappable
    Paired,
}

/// Ordered channel positions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMap(pub Vec<ChannelPosition>);

impl ChannelMap {
    /// Conventional layout for common channel counts
    pub fn standard(channels: u32) -> Option<ChannelMap> {
        use ChannelPosition::*;
        let positions = match channels {
            1 => vec![Mono],
            2 => vec![FrontLeft, FrontRight],
            4 => vec![FrontLeft, FrontRight, RearLeft, RearRight],
            6 => vec![FrontLeft, FrontRight, RearLeft, RearRight, FrontCenter, Lfe],
            8 => vec![
                FrontLeft,
                FrontRight,
                RearLeft,
                RearRight,
                FrontCenter,
                Lfe,
                SideLeft,
                SideRight,
            ],
            _ => return None,
        };
        Some(ChannelMap(positions))
    }

    pub fn channels(&self) -> usize {
        self.0.len()
    }

    /// Same positions in any order
    pub fn is_permutation_of(&self, other: &ChannelMap) -> bool {
        let mut a = self.0.clone();
        let mut b = other.0.clone();
        a.sort_by_key(|p| *p as u8);
        b.sort_by_key(|p| *p as u8);
        a == b
    }
}

impl fmt::Display for ChannelMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|p| p.short_name()).collect();
        f.write_str(&names.join(" "))
    }
}

/// Map offered by a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueriedChmap {
    pub kind: ChmapType,
    pub map: ChannelMap,
}
