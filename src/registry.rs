//! Opening PCMs by name
//!
//! ```text
//!  open("out")
//!      │
//!      ▼
//!  [pcm.out] ──type──► built-in table ──miss──► dynamic loader
//!      │                     │                        │
//!      └──── mode tokens     └──────── PcmOpenFn ◄────┘
//!                                         │
//!                                         ▼
//!                                  constructor(request)
//!                                         │
//!                           plugins open their slaves
//!                           through the same registry
//! ```
//!
//! The registry is a cheap handle; clones share the configuration, the
//! loaded libraries and the taps of `buffer` devices.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::{Config, PcmDefinition};
use crate::error::{Error, Result};
use crate::loader::{Loader, OpenSymbol, PCM_DLSYM_VERSION};
use crate::pcm::mode::OpenMode;
use crate::pcm::slave::SlaveOpener;
use crate::pcm::{Pcm, Stream};
use crate::plugins::buffer::Tap;
use crate::plugins::{self, PcmOpenFn};

/// Everything a constructor needs to open one PCM
pub struct OpenRequest<'a> {
    pub def: PcmDefinition<'a>,
    pub stream: Stream,
    /// Caller's mode with the definition's `mode` tokens applied
    pub mode: OpenMode,
    pub registry: &'a PcmRegistry,
}

struct Inner {
    config: Config,
    loader: Loader,
    loaded: Mutex<HashMap<String, PcmOpenFn>>,
    taps: Mutex<HashMap<String, Tap>>,
}

#[derive(Clone)]
pub struct PcmRegistry {
    inner: Arc<Inner>,
}

impl fmt::Debug for PcmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcmRegistry")
            .field("pcms", &self.inner.config.pcm.len())
            .field("loader", &self.inner.loader)
            .finish()
    }
}

impl Default for PcmRegistry {
    fn default() -> Self {
        Self::new(Config::builtin())
    }
}

impl PcmRegistry {
    pub fn new(mut config: Config) -> Self {
        config.insert_builtins();
        Self {
            inner: Arc::new(Inner {
                config,
                loader: Loader::new(),
                loaded: Mutex::new(HashMap::new()),
                taps: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Tap of the `buffer` device `name`, created on first use
    pub fn tap(&self, name: &str) -> Tap {
        self.inner
            .taps
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Constructor for `type_name`: built-ins first, then the loader
    pub fn constructor(&self, type_name: &str) -> Result<PcmOpenFn> {
        if let Some(open) = plugins::builtin(type_name) {
            return Ok(open);
        }
        if let Some(open) = self.inner.loaded.lock().get(type_name) {
            return Ok(*open);
        }

        let symbol = OpenSymbol::resolve(&self.inner.config, "pcm", type_name);
        tracing::debug!("Looking up PCM type {} as {}", type_name, symbol);
        // SAFETY: constructors exported under the PCM version marker have
        // the `PcmOpenFn` signature
        let open: PcmOpenFn = unsafe { self.inner.loader.load(&symbol, PCM_DLSYM_VERSION)? };
        self.inner
            .loaded
            .lock()
            .insert(type_name.to_string(), open);
        Ok(open)
    }

    /// Open the PCM called `name`
    pub fn open(&self, name: &str, stream: Stream, mode: OpenMode) -> Result<Pcm> {
        let def = self.inner.config.pcm(name).ok_or_else(|| {
            tracing::error!("Unknown PCM {}", name);
            Error::UnknownPcm(name.to_string())
        })?;
        let type_name = def.type_name()?;
        let mode = def.mode(mode)?;
        let open = self.constructor(type_name)?;

        let request = OpenRequest {
            def,
            stream,
            mode,
            registry: self,
        };
        let pcm = open(&request)?;
        tracing::debug!(pcm = name, kind = type_name, %stream, %mode, "opened");
        Ok(pcm)
    }
}

impl SlaveOpener for PcmRegistry {
    fn open_slave(&self, name: &str, stream: Stream, mode: OpenMode) -> Result<Pcm> {
        self.open(name, stream, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LoaderError;

    fn registry(text: &str) -> PcmRegistry {
        PcmRegistry::new(text.parse().unwrap())
    }

    #[test]
    fn test_open_builtin_null() {
        let registry = PcmRegistry::default();
        let pcm = registry.open("null", Stream::Playback, OpenMode::BLOCK).unwrap();
        assert_eq!(pcm.type_name(), "null");
        assert_eq!(pcm.name(), "null");
    }

    #[test]
    fn test_null_present_in_any_config() {
        let parsed = registry("[pcm.other]\ntype = \"null\"\n");
        for registry in [PcmRegistry::new(Config::default()), parsed] {
            let pcm = registry.open("null", Stream::Playback, OpenMode::BLOCK).unwrap();
            assert_eq!(pcm.type_name(), "null");
        }
    }

    #[test]
    fn test_unknown_pcm() {
        let err = PcmRegistry::default()
            .open("missing", Stream::Playback, OpenMode::BLOCK)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownPcm(ref name) if name == "missing"));
    }

    #[test]
    fn test_mode_tokens_applied() {
        let on = registry("[pcm.quiet]\ntype = \"null\"\nmode = [\"nonblock\", \"async\"]\n");
        let pcm = on.open("quiet", Stream::Playback, OpenMode::ASYNC).unwrap();
        assert!(pcm.mode().is_nonblock());
        assert!(pcm.mode().is_async());

        let off = registry("[pcm.quiet]\ntype = \"null\"\nmode = \"!async\"\n");
        let pcm = off.open("quiet", Stream::Playback, OpenMode::ASYNC).unwrap();
        assert_eq!(pcm.mode(), OpenMode::BLOCK);
    }

    #[test]
    fn test_unknown_field_on_null() {
        let err = registry("[pcm.x]\ntype = \"null\"\nrate = 44100\n")
            .open("x", Stream::Playback, OpenMode::BLOCK).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_taps_shared_between_clones() {
        let config = "[pcm.hw]\ntype = \"buffer\"\nchannels = 1\nformats = \"S16_LE\"\n";
        let first = registry(config);
        let second = first.clone();
        let mut pcm = second.open("hw", Stream::Playback, OpenMode::BLOCK).unwrap();

        let mut params = crate::pcm::params::HwParams::any();
        params.set_rate(8000).unwrap();
        params.set_period_size(16).unwrap();
        params.set_periods(2).unwrap();
        pcm.hw_params(&mut params).unwrap();
        pcm.writei(&[1, 0, 2, 0], 2).unwrap();

        assert_eq!(first.tap("hw").configured(), 1);
        assert_eq!(first.tap("hw").recorded(), vec![1, 0, 2, 0]);
    }

    #[test]
    fn test_missing_library_for_type() {
        let ext = registry(
            "[pcm.ext]\ntype = \"ext\"\n[pcm_type.ext]\nlib = \"/nonexistent/libpcm_ext.so\"\n",
        );
        let err = ext.open("ext", Stream::Playback, OpenMode::BLOCK).unwrap_err();
        assert!(matches!(err, Error::Loader(LoaderError::LibraryNotFound(_))));
    }
}
