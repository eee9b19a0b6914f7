//! # Configuration
//!
//! PCM devices and loader overrides are declared in TOML:
//!
//! ```toml
//! [pcm.out]
//! type = "fswitch"
//!
//! [pcm.out.slaves.0]
//! pcm = "speakers"
//! format = "S16_LE"
//!
//! [pcm.out.slaves.1]
//! pcm = "null"
//!
//! [pcm_type.mydev]
//! lib = "libpcm_mydev.so"
//! open = "mydev_open"
//! ```
//!
//! Each definition is kept as a raw table; the plugin that opens it checks
//! its own fields through [`PcmDefinition`].
//!
//! ## Search Path
//!
//! 1. `PCMPLUG_CONFIG` environment variable
//! 2. `./pcmplug.toml`
//! 3. `~/.config/pcmplug/pcm.toml`
//! 4. `/etc/pcmplug/pcm.toml`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Error, Result};
use crate::pcm::mode::OpenMode;
use crate::pcm::params::Interval;

/// Fields every definition may carry
pub const GENERIC_IDS: [&str; 3] = ["type", "comment", "hint"];

/// Fields handled by the registry for every PCM definition
pub const DEVICE_IDS: [&str; 1] = ["mode"];

/// Log a configuration error and wrap it
pub fn config_error(err: ConfigError) -> Error {
    tracing::error!("{}", err);
    Error::Config(err)
}

/// Whether `id` is accepted by every definition
pub fn is_generic_id(id: &str) -> bool {
    GENERIC_IDS.contains(&id)
}

/// Loader override for one dynamically loaded type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDefinition {
    /// Shared library holding the constructor
    pub lib: Option<String>,
    /// Constructor symbol name
    pub open: Option<String>,
    pub comment: Option<String>,
}

/// Parsed configuration tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pcm: BTreeMap<String, toml::Table>,
    /// `<subsystem>_type` tables
    #[serde(flatten)]
    pub types: BTreeMap<String, BTreeMap<String, TypeDefinition>>,
}

impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(s).map_err(|e| config_error(ConfigError::Parse(e.to_string())))?;
        config.validate()?;
        config.insert_builtins();
        Ok(config)
    }
}

impl Config {
    /// Configuration defining only the built-in `null` device
    pub fn builtin() -> Self {
        let mut config = Config::default();
        config.insert_builtins();
        config
    }

    /// Define `null` unless the configuration already has a PCM of that name
    pub fn insert_builtins(&mut self) {
        self.pcm.entry("null".into()).or_insert_with(|| {
            let mut null = toml::Table::new();
            null.insert("type".into(), toml::Value::String("null".into()));
            null
        });
    }

    /// Load from the first file on the search path, or the built-in default
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("PCMPLUG_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        for path in Self::search_paths() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::builtin())
    }

    /// Load a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            config_error(ConfigError::Parse(format!("{}: {}", path.display(), e)))
        })?;
        let config: Config = content.parse()?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Per-user configuration file
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "pcmplug").map(|dirs| dirs.config_dir().join("pcm.toml"))
    }

    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./pcmplug.toml")];
        if let Some(path) = Self::default_path() {
            paths.push(path);
        }
        paths.push(PathBuf::from("/etc/pcmplug/pcm.toml"));
        paths
    }

    fn validate(&self) -> Result<()> {
        for key in self.types.keys() {
            if !key.ends_with("_type") {
                return Err(config_error(ConfigError::UnknownField {
                    context: "configuration".into(),
                    field: key.clone(),
                }));
            }
        }
        Ok(())
    }

    /// Definition of the PCM `name`
    pub fn pcm<'a>(&'a self, name: &'a str) -> Option<PcmDefinition<'a>> {
        self.pcm.get(name).map(|table| PcmDefinition { name, table })
    }

    pub fn pcm_names(&self) -> impl Iterator<Item = &str> {
        self.pcm.keys().map(String::as_str)
    }

    /// Loader override for `type_name` of `subsystem`
    pub fn type_definition(&self, subsystem: &str, type_name: &str) -> Option<&TypeDefinition> {
        self.types
            .get(&format!("{}_type", subsystem))
            .and_then(|types| types.get(type_name))
    }
}

/// One `[pcm.<name>]` table with typed accessors
#[derive(Debug, Clone, Copy)]
pub struct PcmDefinition<'a> {
    pub name: &'a str,
    pub table: &'a toml::Table,
}

impl<'a> PcmDefinition<'a> {
    fn context(&self) -> String {
        format!("pcm.{}", self.name)
    }

    fn invalid_type(&self, field: &str) -> Error {
        config_error(ConfigError::InvalidType {
            context: self.context(),
            field: field.to_string(),
        })
    }

    /// Plugin type; missing `type` is an error
    pub fn type_name(&self) -> Result<&'a str> {
        self.get_str("type")?.ok_or_else(|| {
            config_error(ConfigError::MissingField {
                context: self.context(),
                field: "type".into(),
            })
        })
    }

    /// Reject any field that is neither generic nor in `allowed`
    pub fn check_fields(&self, allowed: &[&str]) -> Result<()> {
        for key in self.table.keys() {
            let key = key.as_str();
            if is_generic_id(key) || DEVICE_IDS.contains(&key) || allowed.contains(&key) {
                continue;
            }
            return Err(config_error(ConfigError::UnknownField {
                context: self.context(),
                field: key.to_string(),
            }));
        }
        Ok(())
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&'a str>> {
        match self.table.get(key) {
            None => Ok(None),
            Some(toml::Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(self.invalid_type(key)),
        }
    }

    pub fn get_table(&self, key: &str) -> Result<Option<&'a toml::Table>> {
        match self.table.get(key) {
            None => Ok(None),
            Some(toml::Value::Table(t)) => Ok(Some(t)),
            Some(_) => Err(self.invalid_type(key)),
        }
    }

    /// A string or an array of strings
    pub fn get_str_list(&self, key: &str) -> Result<Option<Vec<&'a str>>> {
        match self.table.get(key) {
            None => Ok(None),
            Some(toml::Value::String(s)) => Ok(Some(vec![s.as_str()])),
            Some(toml::Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().ok_or_else(|| self.invalid_type(key)))
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(_) => Err(self.invalid_type(key)),
        }
    }

    /// An integer or a `[min, max]` pair
    pub fn get_range(&self, key: &str) -> Result<Option<Interval>> {
        let to_u32 = |v: &toml::Value| -> Result<u32> {
            v.as_integer()
                .and_then(|i| u32::try_from(i).ok())
                .ok_or_else(|| self.invalid_type(key))
        };
        match self.table.get(key) {
            None => Ok(None),
            Some(toml::Value::Array(pair)) if pair.len() == 2 => {
                let interval = Interval::new(to_u32(&pair[0])?, to_u32(&pair[1])?);
                if interval.is_empty() {
                    return Err(config_error(ConfigError::InvalidValue {
                        field: format!("{}.{}", self.context(), key),
                        value: format!("{}", interval),
                    }));
                }
                Ok(Some(interval))
            }
            Some(value) => Ok(Some(Interval::single(to_u32(value)?))),
        }
    }

    /// Apply the `mode` token list on top of `base`
    pub fn mode(&self, base: OpenMode) -> Result<OpenMode> {
        match self.get_str_list("mode")? {
            Some(tokens) => Ok(OpenMode::apply_tokens(base, tokens)),
            None => Ok(base),
        }
    }
}
