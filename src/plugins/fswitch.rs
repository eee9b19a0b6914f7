//! Format switch PCM
//!
//! Routes playback to one of several slaves chosen by the sample format
//! the application commits. Until the first commit a `null` placeholder
//! serves refinement, so the application sees the full parameter space.
//! The sample format is never carried between the two sides during
//! refinement; it is pinned on the slave only when committing. Committing
//! a format that differs from the active slave's closes that slave and
//! opens the matching one before the slave is configured.
//!
//! ```toml
//! [pcm.out]
//! type = "fswitch"
//!
//! [pcm.out.slaves.0]
//! pcm = "pcm_s16"
//! format = "S16_LE"
//!
//! [pcm.out.slaves.1]
//! pcm = "pcm_float"
//! format = "FLOAT_LE"
//! ```
//!
//! The first entry whose format equals the committed one wins; when none
//! matches the first entry is used.

use std::fmt;
use std::sync::Arc;

use crate::config::{config_error, is_generic_id, PcmDefinition};
use crate::error::{ConfigError, Error, Result};
use crate::pcm::format::Format;
use crate::pcm::mode::OpenMode;
use crate::pcm::ops::PcmOps;
use crate::pcm::params::HwParams;
use crate::pcm::plugin::{FormatCopy, PluginBase};
use crate::pcm::refine::{hw_params_slave, hw_refine_slave, LinkedRefine};
use crate::pcm::slave::{attach_slave, swap_slave, Generic, SlaveHandle, SlaveOpener};
use crate::pcm::{ChannelInfo, MmapRegion, Pcm, PcmCommon, PcmSetup, Stream};

/// Name of the placeholder slave opened before the first commit
pub const PLACEHOLDER_SLAVE: &str = "null";

/// One row of the slave table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaveEntry {
    pub name: String,
    /// `None` never matches a committed format
    pub format: Option<Format>,
}

impl SlaveEntry {
    pub fn new(name: &str, format: Option<Format>) -> Self {
        Self {
            name: name.to_string(),
            format,
        }
    }
}

/// Index of the entry serving `format`
pub fn select_slave(slaves: &[SlaveEntry], format: Format) -> usize {
    slaves
        .iter()
        .position(|entry| entry.format == Some(format))
        .unwrap_or(0)
}

pub struct FormatSwitch {
    plugin: PluginBase,
    /// Refinement leaves the format to the application
    refine: LinkedRefine,
    /// Commit pins the slave to the committed format
    commit: LinkedRefine,
    transfer: FormatCopy,
    slaves: Vec<SlaveEntry>,
    /// `None` while the placeholder is attached
    active: Option<usize>,
    opener: Arc<dyn SlaveOpener>,
}

impl FormatSwitch {
    /// Create a format switch on top of an already opened `slave`
    pub fn open(
        name: &str,
        mut slave: SlaveHandle,
        slaves: Vec<SlaveEntry>,
        mode: OpenMode,
        opener: Arc<dyn SlaveOpener>,
    ) -> Result<Pcm> {
        if slaves.is_empty() {
            return Err(Error::InvalidArgument(format!("{} has an empty slave table", name)));
        }
        let stream = slave.lock().stream();
        if stream != Stream::Playback {
            return Err(Error::InvalidArgument(
                "The fswitch plugin supports only playback streams".into(),
            ));
        }

        let mut common = PcmCommon::new(name, stream, mode);
        attach_slave(&mut common, &slave.lock())?;
        common.link.reset_own();

        let ops = FormatSwitch {
            plugin: PluginBase::new(Generic::new(slave)),
            refine: LinkedRefine::switching(),
            commit: LinkedRefine::copying(),
            transfer: FormatCopy,
            slaves,
            active: None,
            opener,
        };
        tracing::debug!(pcm = name, entries = ops.slaves.len(), "opened format switch");
        Ok(Pcm::new(common, Box::new(ops)))
    }

    /// Open from a `type = "fswitch"` definition
    pub fn open_definition(
        def: &PcmDefinition<'_>,
        stream: Stream,
        mode: OpenMode,
        opener: Arc<dyn SlaveOpener>,
    ) -> Result<Pcm> {
        if stream != Stream::Playback {
            tracing::error!("The fswitch plugin supports only playback streams");
            return Err(Error::InvalidArgument(
                "The fswitch plugin supports only playback streams".into(),
            ));
        }
        let slaves = parse_slave_table(def)?;
        let placeholder = opener.open_slave(PLACEHOLDER_SLAVE, stream, mode)?;
        Self::open(def.name, SlaveHandle::owned(placeholder), slaves, mode, opener)
    }

    pub fn slaves(&self) -> &[SlaveEntry] {
        &self.slaves
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }
}

/// Fields of one `slaves.<id>` entry
const ENTRY_FIELDS: [&str; 2] = ["pcm", "format"];

fn entry_order(id: &str) -> (Option<u64>, &str) {
    (id.parse().ok(), id)
}

fn entry_str<'a>(entry: &'a toml::Table, context: &str, field: &str) -> Result<Option<&'a str>> {
    match entry.get(field) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(config_error(ConfigError::InvalidType {
            context: context.to_string(),
            field: field.to_string(),
        })),
    }
}

/// Read the `slaves` table of a definition; entries are ordered by id,
/// numerically when ids are numbers
pub fn parse_slave_table(def: &PcmDefinition<'_>) -> Result<Vec<SlaveEntry>> {
    def.check_fields(&["slaves"])?;
    let context = format!("pcm.{}", def.name);
    let table = def.get_table("slaves")?.ok_or_else(|| {
        config_error(ConfigError::MissingField {
            context: context.clone(),
            field: "slaves".into(),
        })
    })?;

    let mut ids: Vec<&str> = table
        .keys()
        .map(String::as_str)
        .filter(|id| !is_generic_id(id))
        .collect();
    ids.sort_by(|a, b| entry_order(a).cmp(&entry_order(b)));

    let mut slaves = Vec::with_capacity(ids.len());
    for id in ids {
        let entry = table[id].as_table().ok_or_else(|| {
            config_error(ConfigError::InvalidType {
                context: context.clone(),
                field: format!("slaves.{}", id),
            })
        })?;
        let entry_context = format!("{}.slaves.{}", context, id);
        if let Some(field) = entry.keys().find(|k| !ENTRY_FIELDS.contains(&k.as_str())) {
            return Err(config_error(ConfigError::UnknownField {
                context: entry_context,
                field: field.clone(),
            }));
        }
        let name = entry_str(entry, &entry_context, "pcm")?.ok_or_else(|| {
            config_error(ConfigError::MissingField {
                context: entry_context.clone(),
                field: "pcm".into(),
            })
        })?;
        let format = entry_str(entry, &entry_context, "format")?
            .map(|f| {
                f.parse::<Format>().map_err(|e| {
                    tracing::error!("{}: {}", entry_context, e);
                    e
                })
            })
            .transpose()?;
        slaves.push(SlaveEntry::new(name, format));
    }

    if slaves.is_empty() {
        return Err(config_error(ConfigError::InvalidValue {
            field: format!("{}.slaves", context),
            value: "empty table".into(),
        }));
    }
    Ok(slaves)
}

impl PcmOps for FormatSwitch {
    fn type_name(&self) -> &'static str {
        "fswitch"
    }

    fn generic(&mut self) -> Option<&mut Generic> {
        Some(&mut self.plugin.generic)
    }

    fn close(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.slaves.clear();
        self.active = None;
        common.link.unlink_hw();
        common.link.unlink_appl();
        self.plugin.generic.close_slave()
    }

    fn hw_refine(&mut self, common: &mut PcmCommon, params: &mut HwParams) -> Result<()> {
        let mut slave = self.plugin.generic.slave(&common.name)?;
        hw_refine_slave(params, &self.refine, |sparams| slave.hw_refine(sparams))
    }

    fn hw_params(&mut self, common: &mut PcmCommon, params: &mut HwParams) -> Result<()> {
        let format = params.format()?;
        let wanted = select_slave(&self.slaves, format);

        if self.active != Some(wanted) {
            let entry = &self.slaves[wanted];
            tracing::info!(
                pcm = %common.name,
                %format,
                slave = %entry.name,
                "format selects slave {}",
                wanted
            );
            self.active = None;
            swap_slave(common, &mut self.plugin.generic, self.opener.as_ref(), &entry.name)?;
            self.active = Some(wanted);
        }

        {
            let mut slave = self.plugin.generic.slave(&common.name)?;
            hw_params_slave(params, &self.commit, |sparams| slave.hw_params(sparams))?;
        }
        self.plugin.setup_buffers(&PcmSetup::from_params(params)?)
    }

    fn hw_free(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.plugin.hw_free(common)
    }

    fn channel_info(&mut self, common: &PcmCommon, channel: u32) -> Result<ChannelInfo> {
        self.plugin.channel_info(common, channel)
    }

    fn dump(&mut self, common: &PcmCommon, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "Format switch PCM {}", common.name)?;
        Pcm::dump_setup(common, out)?;
        writeln!(out, "Slave table:")?;
        for (i, entry) in self.slaves.iter().enumerate() {
            let marker = if self.active == Some(i) { '*' } else { ' ' };
            let format = entry.format.map(Format::name).unwrap_or("-");
            writeln!(out, " {} {:2} {:<12} {}", marker, i, format, entry.name)?;
        }
        self.plugin.dump_slave(common, out)
    }

    fn prepare(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.plugin.prepare(common)
    }

    fn start(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.plugin.start(common)
    }

    fn drop_frames(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.plugin.drop_frames(common)
    }

    fn drain(&mut self, common: &mut PcmCommon) -> Result<()> {
        self.plugin.drain(common)
    }

    fn avail_update(&mut self, common: &mut PcmCommon) -> Result<usize> {
        self.plugin.avail_update(common, &self.transfer)
    }

    fn mmap_begin(&mut self, common: &PcmCommon, frames: usize) -> Result<MmapRegion<'_>> {
        self.plugin.mmap_begin(common, frames)
    }

    fn mmap_commit(
        &mut self,
        common: &mut PcmCommon,
        offset: usize,
        frames: usize,
    ) -> Result<usize> {
        self.plugin.mmap_commit(common, &self.transfer, offset, frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<SlaveEntry> {
        vec![
            SlaveEntry::new("a", Some(Format::S16Le)),
            SlaveEntry::new("b", Some(Format::S24_3Le)),
            SlaveEntry::new("c", None),
            SlaveEntry::new("d", Some(Format::S24_3Le)),
        ]
    }

    #[test]
    fn test_select_exact_match() {
        assert_eq!(select_slave(&table(), Format::S16Le), 0);
        assert_eq!(select_slave(&table(), Format::S24_3Le), 1);
    }

    #[test]
    fn test_select_falls_back_to_first() {
        assert_eq!(select_slave(&table(), Format::FloatLe), 0);
    }

    #[test]
    fn test_parse_slave_table_order() {
        let config: crate::config::Config = r#"
[pcm.sw]
type = "fswitch"
[pcm.sw.slaves.10]
pcm = "ten"
[pcm.sw.slaves.2]
pcm = "two"
format = "S16_LE"
[pcm.sw.slaves.comment]
pcm = "ignored"
"#
        .parse()
        .unwrap();
        let slaves = parse_slave_table(&config.pcm("sw").unwrap()).unwrap();
        assert_eq!(
            slaves,
            vec![
                SlaveEntry::new("two", Some(Format::S16Le)),
                SlaveEntry::new("ten", None),
            ]
        );
    }

    #[test]
    fn test_entry_fields_checked_with_entry_context() {
        let cases = [
            ("mode = \"nonblock\"", "mode"),
            ("comment = \"speakers\"", "comment"),
            ("type = \"null\"", "type"),
        ];
        for (line, bad) in cases {
            let text = format!(
                "[pcm.sw]\ntype = \"fswitch\"\n[pcm.sw.slaves.0]\npcm = \"x\"\n{}\n",
                line
            );
            let config: crate::config::Config = text.parse().unwrap();
            let err = parse_slave_table(&config.pcm("sw").unwrap()).unwrap_err();
            assert!(
                matches!(
                    err,
                    Error::Config(ConfigError::UnknownField { ref context, ref field })
                        if context == "pcm.sw.slaves.0" && field == bad
                ),
                "{:?}",
                err
            );
        }

        let config: crate::config::Config =
            "[pcm.sw]\ntype = \"fswitch\"\n[pcm.sw.slaves.1]\npcm = 5\n".parse().unwrap();
        let err = parse_slave_table(&config.pcm("sw").unwrap()).unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidType { ref context, ref field })
                if context == "pcm.sw.slaves.1" && field == "pcm"
        ));
    }

    #[test]
    fn test_parse_rejects_bad_tables() {
        let cases = [
            "[pcm.sw]\ntype = \"fswitch\"\n",
            "[pcm.sw]\ntype = \"fswitch\"\nslaves = {}\n",
            "[pcm.sw]\ntype = \"fswitch\"\nbogus = 1\n[pcm.sw.slaves.0]\npcm = \"x\"\n",
            "[pcm.sw]\ntype = \"fswitch\"\nslaves = 3\n",
            "[pcm.sw]\ntype = \"fswitch\"\n[pcm.sw.slaves.0]\nformat = \"S16_LE\"\n",
        ];
        for case in cases {
            let config: crate::config::Config = case.parse().unwrap();
            let err = parse_slave_table(&config.pcm("sw").unwrap()).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{}: {:?}", case, err);
        }
    }
}
