//! Slave ownership and the slave lifecycle used by plugins
//!
//! A plugin holds at most one slave at a time. The slave is either owned
//! (closed together with the plugin) or shared with other users (only
//! detached). Replacing the slave of a configured plugin goes through
//! [`swap_slave`], which keeps the position links consistent.

use parking_lot::MutexGuard;
use std::ops::{Deref, DerefMut};

use crate::error::{Error, Result};
use crate::pcm::mode::OpenMode;
use crate::pcm::{Pcm, PcmCommon, SharedPcm, Stream};

/// Something that can open PCMs by name on behalf of a plugin
pub trait SlaveOpener: Send + Sync {
    fn open_slave(&self, name: &str, stream: Stream, mode: OpenMode) -> Result<Pcm>;
}

/// A slave PCM together with who is responsible for closing it
pub enum SlaveHandle {
    /// Closed when detached from the plugin
    Owned(Box<Pcm>),
    /// Left open for its other users when detached
    Shared(SharedPcm),
}

impl SlaveHandle {
    pub fn owned(pcm: Pcm) -> Self {
        SlaveHandle::Owned(Box::new(pcm))
    }

    pub fn shared(pcm: SharedPcm) -> Self {
        SlaveHandle::Shared(pcm)
    }

    /// Whether detaching this slave closes it
    pub fn closes_with_master(&self) -> bool {
        matches!(self, SlaveHandle::Owned(_))
    }

    pub fn lock(&mut self) -> SlaveGuard<'_> {
        match self {
            SlaveHandle::Owned(pcm) => SlaveGuard::Owned(&mut **pcm),
            SlaveHandle::Shared(pcm) => SlaveGuard::Shared(pcm.lock()),
        }
    }

    /// Detach the slave, closing it when owned
    pub fn release(self) -> Result<()> {
        match self {
            SlaveHandle::Owned(pcm) => pcm.close(),
            SlaveHandle::Shared(_) => Ok(()),
        }
    }
}

/// Exclusive access to a slave for the duration of one call
pub enum SlaveGuard<'a> {
    Owned(&'a mut Pcm),
    Shared(MutexGuard<'a, Pcm>),
}

impl Deref for SlaveGuard<'_> {
    type Target = Pcm;

    fn deref(&self) -> &Pcm {
        match self {
            SlaveGuard::Owned(pcm) => &**pcm,
            SlaveGuard::Shared(guard) => &**guard,
        }
    }
}

impl DerefMut for SlaveGuard<'_> {
    fn deref_mut(&mut self) -> &mut Pcm {
        match self {
            SlaveGuard::Owned(pcm) => &mut **pcm,
            SlaveGuard::Shared(guard) => &mut **guard,
        }
    }
}

/// Slave slot shared by all plugins
#[derive(Default)]
pub struct Generic {
    slave: Option<SlaveHandle>,
}

impl Generic {
    pub fn new(slave: SlaveHandle) -> Self {
        Self { slave: Some(slave) }
    }

    /// Slot without a slave
    pub fn empty() -> Self {
        Self { slave: None }
    }

    pub fn has_slave(&self) -> bool {
        self.slave.is_some()
    }

    /// Current slave, or `NoSlave` naming the master
    pub fn slave(&mut self, master: &str) -> Result<SlaveGuard<'_>> {
        self.slave
            .as_mut()
            .map(SlaveHandle::lock)
            .ok_or_else(|| Error::NoSlave(master.to_string()))
    }

    pub fn take(&mut self) -> Option<SlaveHandle> {
        self.slave.take()
    }

    /// Install `slave`, returning whatever occupied the slot
    pub fn install(&mut self, slave: SlaveHandle) -> Option<SlaveHandle> {
        self.slave.replace(slave)
    }

    pub fn close_slave(&mut self) -> Result<()> {
        match self.slave.take() {
            Some(handle) => handle.release(),
            None => Ok(()),
        }
    }
}

/// Link the master's positions to `slave` and adopt its poll descriptor
pub fn attach_slave(common: &mut PcmCommon, slave: &Pcm) -> Result<()> {
    common.poll = slave.poll_descriptor();
    common.tstamp_type = slave.tstamp_type();
    common.link.link_hw(slave.position())?;
    common.link.link_appl(slave.position())?;
    Ok(())
}

/// Replace the slave of a running plugin with a freshly opened `name`.
///
/// The old slave is unlinked and released first. If opening the new one
/// fails the slot stays empty and later calls fail with `NoSlave`. On
/// success the master's own counters restart from the unset sentinel.
pub fn swap_slave(
    common: &mut PcmCommon,
    generic: &mut Generic,
    opener: &dyn SlaveOpener,
    name: &str,
) -> Result<()> {
    common.link.unlink_hw();
    common.link.unlink_appl();
    if let Some(old) = generic.take() {
        if let Err(e) = old.release() {
            tracing::warn!("Failed to close previous slave of {}: {}", common.name, e);
        }
    }

    let pcm = opener.open_slave(name, common.stream, common.mode)?;
    attach_slave(common, &pcm)?;
    common.link.reset_own();
    generic.install(SlaveHandle::owned(pcm));
    tracing::info!(pcm = %common.name, slave = name, "switched slave");
    Ok(())
}
