//! # pcmplug
//!
//! PCM plugin framework: applications open one logical audio device while
//! plugins negotiate hardware parameters with, and move frames to or from,
//! an interchangeable slave device.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            APPLICATION                               │
//! │        hw_refine / hw_params / writei / readi / mmap_commit          │
//! └───────────────────────────────┬──────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Pcm (pcm)  state machine, transfer loops, PcmCommon + Box<PcmOps>   │
//! └───────────────────────────────┬──────────────────────────────────────┘
//!                                 │ PcmOps
//!             ┌───────────────────┴───────────────────┐
//!             ▼                                       ▼
//! ┌──────────────────────────────┐     ┌──────────────────────────────┐
//! │ Plugin (plugins::fswitch,    │     │ Leaf (plugins::null, buffer, │
//! │         plugins::copy)       │     │       cpal)                  │
//! │  ┌────────────────────────┐  │     │  ring buffer + LeafBackend   │
//! │  │ refine: P ⇄ S loop     │  │     └──────────────────────────────┘
//! │  │ (pcm::refine)          │  │                     ▲
//! │  ├────────────────────────┤  │                     │
//! │  │ staging + AreaTransfer │──┼──── mmap_begin ─────┤
//! │  │ (pcm::plugin)          │  │     mmap_commit     │
//! │  ├────────────────────────┤  │                     │
//! │  │ slave slot, swap_slave │──┼──── open by name ───┘
//! │  │ (pcm::slave)           │  │     (registry)
//! │  └────────────────────────┘  │
//! └──────────────────────────────┘
//! ```
//!
//! Devices are declared in TOML (see [`config`]) and opened through
//! [`registry::PcmRegistry`], which also resolves types that live in
//! shared libraries (see [`loader`]).

pub mod config;
pub mod error;
pub mod loader;
pub mod pcm;
pub mod plugins;
pub mod registry;

pub use error::{Error, Result};
pub use pcm::{Pcm, SharedPcm, Stream};
pub use registry::PcmRegistry;

/// Library-wide constants
pub mod constants {
    /// Rate the command line tool negotiates by default
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u32 = 2;

    /// Default period size in frames
    pub const DEFAULT_PERIOD_SIZE: u32 = 1024;

    /// Default number of periods per buffer
    pub const DEFAULT_PERIODS: u32 = 4;

    /// Name opened when none is given
    pub const DEFAULT_PCM: &str = "default";
}
