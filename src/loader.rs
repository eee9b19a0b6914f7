//! Dynamic loading of device constructors
//!
//! A type `T` of subsystem `S` is opened through the symbol
//! `_snd_<S>_<T>_open` found in the running program, unless a
//! `[<S>_type.<T>]` definition names another `lib` and/or `open` symbol.
//! Before the constructor is resolved the library must export the version
//! marker `_<open><version>`, so libraries built against another interface
//! revision are refused instead of called.

use libloading::Library;
use parking_lot::Mutex;
use std::fmt;

use crate::config::Config;
use crate::error::{Error, LoaderError, Result};

/// Version tag of PCM constructors
pub const PCM_DLSYM_VERSION: &str = "_dlsym_pcm_001";

/// Version tag of timer query constructors
pub const TIMER_QUERY_DLSYM_VERSION: &str = "_dlsym_timer_query_001";

/// Where a constructor is looked up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSymbol {
    /// Shared library; `None` is the running program
    pub library: Option<String>,
    pub symbol: String,
}

impl OpenSymbol {
    /// Resolve the constructor of `type_name` in `subsystem`
    pub fn resolve(config: &Config, subsystem: &str, type_name: &str) -> Self {
        let definition = config.type_definition(subsystem, type_name);
        let library = definition.and_then(|d| d.lib.clone());
        let symbol = definition
            .and_then(|d| d.open.clone())
            .unwrap_or_else(|| default_symbol(subsystem, type_name));
        Self { library, symbol }
    }

    /// Name of the marker that proves the library matches `version`
    pub fn version_marker(&self, version: &str) -> String {
        format!("_{}{}", self.symbol, version)
    }

    fn library_name(&self) -> &str {
        self.library.as_deref().unwrap_or("<program>")
    }
}

impl fmt::Display for OpenSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.symbol, self.library_name())
    }
}

/// Conventional constructor name for `type_name` of `subsystem`
pub fn default_symbol(subsystem: &str, type_name: &str) -> String {
    format!("_snd_{}_{}_open", subsystem, type_name)
}

fn loader_error(err: LoaderError) -> Error {
    tracing::error!("{}", err);
    Error::Loader(err)
}

#[cfg(unix)]
fn open_program() -> std::result::Result<Library, libloading::Error> {
    Ok(libloading::os::unix::Library::this().into())
}

#[cfg(windows)]
fn open_program() -> std::result::Result<Library, libloading::Error> {
    libloading::os::windows::Library::this().map(Into::into)
}

/// Keeps every library a constructor came from loaded for the process lifetime
#[derive(Default)]
pub struct Loader {
    libraries: Mutex<Vec<Library>>,
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("libraries", &self.libraries.lock().len())
            .finish()
    }
}

impl Loader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the library of `open`, verify its version marker and resolve the
    /// constructor. The library stays loaded while the loader lives.
    ///
    /// # Safety
    ///
    /// `T` must be the exact type of the exported symbol.
    pub unsafe fn load<T: Copy>(&self, open: &OpenSymbol, version: &str) -> Result<T> {
        let library = match &open.library {
            Some(path) => Library::new(path),
            None => open_program(),
        }
        .map_err(|e| {
            tracing::debug!("dlopen {} failed: {}", open.library_name(), e);
            loader_error(LoaderError::LibraryNotFound(open.library_name().to_string()))
        })?;

        let marker = open.version_marker(version);
        if library.get::<*const ()>(marker.as_bytes()).is_err() {
            return Err(loader_error(LoaderError::IncompatibleVersion {
                symbol: open.symbol.clone(),
                expected: version.to_string(),
            }));
        }

        let constructor = *library.get::<T>(open.symbol.as_bytes()).map_err(|_| {
            loader_error(LoaderError::SymbolMissing {
                symbol: open.symbol.clone(),
                library: open.library_name().to_string(),
            })
        })?;

        tracing::info!("Loaded constructor {}", open);
        self.libraries.lock().push(library);
        Ok(constructor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_symbol_name() {
        let config = Config::default();
        let open = OpenSymbol::resolve(&config, "timer_query", "foo");
        assert_eq!(open.symbol, "_snd_timer_query_foo_open");
        assert_eq!(open.library, None);
        assert_eq!(
            open.version_marker(TIMER_QUERY_DLSYM_VERSION),
            "__snd_timer_query_foo_open_dlsym_timer_query_001"
        );
    }

    #[test]
    fn test_override_from_config() {
        let config: Config = "[timer_query_type.foo]\nlib = \"libfoo.so\"\nopen = \"foo_entry\"\n"
            .parse()
            .unwrap();
        let open = OpenSymbol::resolve(&config, "timer_query", "foo");
        assert_eq!(open.symbol, "foo_entry");
        assert_eq!(open.library.as_deref(), Some("libfoo.so"));
    }

    #[test]
    fn test_missing_library() {
        let open = OpenSymbol {
            library: Some("/nonexistent/libpcmplug_missing.so".into()),
            symbol: default_symbol("pcm", "missing"),
        };
        let err = unsafe { Loader::new().load::<fn()>(&open, PCM_DLSYM_VERSION) }.unwrap_err();
        assert!(matches!(err, Error::Loader(LoaderError::LibraryNotFound(_))));
        assert_eq!(err.code(), -crate::error::errno::ENOENT);
    }

    #[cfg(unix)]
    #[test]
    fn test_unknown_type_in_program() {
        let open = OpenSymbol::resolve(&Config::default(), "timer_query", "foo");
        let err = unsafe { Loader::new().load::<fn()>(&open, TIMER_QUERY_DLSYM_VERSION) }
            .unwrap_err();
        assert!(matches!(err, Error::Loader(_)));
        assert!(err.code() < 0);
    }
}
