//! Hardware/application position counters and their linking to a slave

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Frame counter shared between a PCM and whoever links to it.
///
/// `-1` means the counter has not been started since it was created.
#[derive(Debug, Clone)]
pub struct SharedPosition(Arc<AtomicI64>);

impl SharedPosition {
    pub const UNSET: i64 = -1;

    pub fn new(initial: i64) -> Self {
        Self(Arc::new(AtomicI64::new(initial)))
    }

    /// Fresh counter at the unset sentinel
    pub fn unset() -> Self {
        Self::new(Self::UNSET)
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Release);
    }

    pub fn is_unset(&self) -> bool {
        self.get() == Self::UNSET
    }

    /// Advance by `frames`, starting from zero if unset
    pub fn advance(&self, frames: usize) -> i64 {
        let frames = frames as i64;
        let prev = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.max(0) + frames)
            })
            .unwrap_or(0);
        prev.max(0) + frames
    }

    /// Whether both handles refer to the same counter
    pub fn same_as(&self, other: &SharedPosition) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A PCM's own counters plus the counters of the slave it is linked to
#[derive(Debug)]
pub struct PositionLink {
    hw: SharedPosition,
    appl: SharedPosition,
    slave_hw: Option<SharedPosition>,
    slave_appl: Option<SharedPosition>,
}

impl Default for PositionLink {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionLink {
    pub fn new() -> Self {
        Self {
            hw: SharedPosition::unset(),
            appl: SharedPosition::unset(),
            slave_hw: None,
            slave_appl: None,
        }
    }

    /// Frames consumed by the hardware side
    pub fn hw(&self) -> &SharedPosition {
        &self.hw
    }

    /// Frames produced by the application side
    pub fn appl(&self) -> &SharedPosition {
        &self.appl
    }

    pub fn slave_hw(&self) -> Option<&SharedPosition> {
        self.slave_hw.as_ref()
    }

    pub fn slave_appl(&self) -> Option<&SharedPosition> {
        self.slave_appl.as_ref()
    }

    /// Follow the hardware counter of `slave`
    pub fn link_hw(&mut self, slave: &PositionLink) -> Result<()> {
        if self.slave_hw.is_some() {
            return Err(Error::BadState("hardware position already linked".into()));
        }
        self.slave_hw = Some(slave.hw.clone());
        Ok(())
    }

    /// Follow the application counter of `slave`
    pub fn link_appl(&mut self, slave: &PositionLink) -> Result<()> {
        if self.slave_appl.is_some() {
            return Err(Error::BadState("application position already linked".into()));
        }
        self.slave_appl = Some(slave.appl.clone());
        Ok(())
    }

    pub fn unlink_hw(&mut self) -> Option<SharedPosition> {
        self.slave_hw.take()
    }

    pub fn unlink_appl(&mut self) -> Option<SharedPosition> {
        self.slave_appl.take()
    }

    /// Both counters are linked to a slave
    pub fn is_linked(&self) -> bool {
        self.slave_hw.is_some() && self.slave_appl.is_some()
    }

    /// Whether the linked counters belong to `slave`
    pub fn is_linked_to(&self, slave: &PositionLink) -> bool {
        matches!(&self.slave_hw, Some(hw) if hw.same_as(&slave.hw))
            && matches!(&self.slave_appl, Some(appl) if appl.same_as(&slave.appl))
    }

    /// Re-point the own counters at fresh unset tracking.
    ///
    /// Anyone still holding the previous counters keeps the stale values.
    pub fn reset_own(&mut self) {
        self.hw = SharedPosition::unset();
        self.appl = SharedPosition::unset();
    }

    /// Start both own counters at zero
    pub fn start_own(&self) {
        self.hw.set(0);
        self.appl.set(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_from_unset() {
        let pos = SharedPosition::unset();
        assert!(pos.is_unset());
        assert_eq!(pos.advance(10), 10);
        assert_eq!(pos.advance(5), 15);
    }

    #[test]
    fn test_single_link() {
        let slave_a = PositionLink::new();
        let slave_b = PositionLink::new();
        let mut master = PositionLink::new();

        master.link_hw(&slave_a).unwrap();
        master.link_appl(&slave_a).unwrap();
        assert!(master.is_linked_to(&slave_a));
        assert!(master.link_hw(&slave_b).is_err());

        master.unlink_hw();
        master.unlink_appl();
        master.link_hw(&slave_b).unwrap();
        master.link_appl(&slave_b).unwrap();
        assert!(master.is_linked_to(&slave_b));
        assert!(!master.is_linked_to(&slave_a));
    }

    #[test]
    fn test_reset_discards_old_counters() {
        let mut link = PositionLink::new();
        link.start_own();
        link.appl().advance(64);
        let old = link.appl().clone();

        link.reset_own();
        assert!(link.appl().is_unset());
        assert!(link.hw().is_unset());
        assert_eq!(old.get(), 64);
    }
}
