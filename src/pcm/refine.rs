//! Two-sided parameter refinement between a plugin and its slave
//!
//! ```text
//!   client params ──cprepare──▶ client params
//!        │                           ▲
//!        │ schange                   │ cchange
//!        ▼                           │
//!   slave params ──slave refine──▶ slave params
//! ```
//!
//! The loop repeats until the client side stops changing. Every pass only
//! intersects constraints, so the client set shrinks monotonically and the
//! loop is bounded by the number of distinct values; [`MAX_REFINE_ITERATIONS`]
//! guards against misbehaving hooks.

use crate::error::{Error, Result};
use crate::pcm::params::{Access, HwParams, ParamKind, ParamMask, PcmInfo};

/// Upper bound on refinement passes
pub const MAX_REFINE_ITERATIONS: usize = 32;

/// Plugin-specific steps of the refinement protocol
pub trait RefineHooks {
    /// Restrict the client set to what the plugin itself offers
    fn cprepare(&self, params: &mut HwParams) -> Result<()>;
    /// Reset the slave set and restrict it to what the plugin asks of the slave
    fn sprepare(&self, sparams: &mut HwParams) -> Result<()>;
    /// Carry client constraints over to the slave
    fn schange(&self, params: &HwParams, sparams: &mut HwParams) -> Result<()>;
    /// Carry slave constraints back to the client
    fn cchange(&self, params: &mut HwParams, sparams: &HwParams) -> Result<()>;
}

/// Hooks for plugins that move frames unchanged: linked kinds are copied
/// both ways and access is translated between the two sides.
#[derive(Debug, Clone, Copy)]
pub struct LinkedRefine {
    /// Access types offered to the client
    pub client_access: crate::pcm::params::Mask,
    /// Capabilities withheld from the client
    pub client_info_clear: PcmInfo,
    /// Access types requested from the slave
    pub slave_access: crate::pcm::params::Mask,
    /// Kinds copied between both sides
    pub links: ParamMask,
}

impl LinkedRefine {
    /// Client sees shared-memory access without mmap, slave is driven through mmap
    pub fn copying() -> Self {
        Self {
            client_access: Access::shm_mask(),
            client_info_clear: PcmInfo::MMAP | PcmInfo::MMAP_VALID,
            slave_access: Access::mmap_mask(),
            links: ParamMask::ALL.without(ParamKind::Access),
        }
    }

    /// Like [`LinkedRefine::copying`], but the sample format and the sizes
    /// derived from it stay independent on both sides. Used by plugins that
    /// pick their slave by format and only pin it when committing.
    pub fn switching() -> Self {
        Self {
            links: FORMAT_KINDS
                .into_iter()
                .fold(ParamMask::ALL.without(ParamKind::Access), ParamMask::without),
            ..Self::copying()
        }
    }
}

/// Kinds that follow from the sample format
const FORMAT_KINDS: [ParamKind; 4] = [
    ParamKind::Format,
    ParamKind::Subformat,
    ParamKind::SampleBits,
    ParamKind::FrameBits,
];

impl RefineHooks for LinkedRefine {
    fn cprepare(&self, params: &mut HwParams) -> Result<()> {
        params.refine_mask(ParamKind::Access, &self.client_access)?;
        params.info.remove(self.client_info_clear);
        Ok(())
    }

    fn sprepare(&self, sparams: &mut HwParams) -> Result<()> {
        sparams.reset_any();
        sparams.refine_mask(ParamKind::Access, &self.slave_access)?;
        Ok(())
    }

    fn schange(&self, params: &HwParams, sparams: &mut HwParams) -> Result<()> {
        sparams.refine_from(params, self.links)?;
        Ok(())
    }

    fn cchange(&self, params: &mut HwParams, sparams: &HwParams) -> Result<()> {
        params.refine_from(sparams, self.links)?;
        Ok(())
    }
}

/// Refine `params` against a slave until neither side changes.
///
/// `slave_refine` narrows a slave parameter set; it is normally the
/// slave's own `hw_refine`.
pub fn hw_refine_slave<H, F>(params: &mut HwParams, hooks: &H, mut slave_refine: F) -> Result<()>
where
    H: RefineHooks + ?Sized,
    F: FnMut(&mut HwParams) -> Result<()>,
{
    hooks.cprepare(params)?;
    params.refine_soft()?;

    let mut sparams = HwParams::any();
    for pass in 0..MAX_REFINE_ITERATIONS {
        #[cfg(debug_assertions)]
        let before = params.clone();

        hooks.sprepare(&mut sparams)?;
        hooks.schange(params, &mut sparams)?;
        slave_refine(&mut sparams)?;

        let pending = params.take_cmask();
        hooks.cchange(params, &sparams)?;
        params.refine_soft()?;
        let changed = params.cmask();
        params.merge_cmask(pending);

        #[cfg(debug_assertions)]
        debug_assert!(params.is_subset_of(&before), "refinement widened a constraint");

        tracing::trace!(pass, ?changed, "refine pass");
        if changed.is_empty() {
            return Ok(());
        }
    }
    Err(Error::NotConverged(MAX_REFINE_ITERATIONS))
}

/// Derive the slave's parameters from the committed client set and commit them.
///
/// `cchange` runs on the failure path too, so the client set reflects what
/// the slave accepted before rejecting.
pub fn hw_params_slave<H, F>(params: &mut HwParams, hooks: &H, slave_commit: F) -> Result<()>
where
    H: RefineHooks + ?Sized,
    F: FnOnce(&mut HwParams) -> Result<()>,
{
    let mut sparams = HwParams::any();
    hooks.sprepare(&mut sparams)?;
    hooks.schange(params, &mut sparams)?;
    if let Err(e) = slave_commit(&mut sparams) {
        let _ = hooks.cchange(params, &sparams);
        return Err(e);
    }
    hooks.cchange(params, &sparams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcm::format::Format;
    use crate::pcm::params::{Interval, Mask};

    fn slave_caps() -> HwParams {
        let mut caps = HwParams::any();
        caps.refine_mask(ParamKind::Format, &Mask::formats(&[Format::S16Le, Format::S32Le]))
            .unwrap();
        caps.refine_interval(ParamKind::Rate, &Interval::new(8000, 48000)).unwrap();
        caps.refine_interval(ParamKind::Channels, &Interval::new(1, 2)).unwrap();
        caps
    }

    fn refine_against(caps: &HwParams) -> impl FnMut(&mut HwParams) -> Result<()> + '_ {
        move |sparams: &mut HwParams| {
            sparams.refine_from(caps, ParamMask::ALL)?;
            sparams.refine_soft()?;
            Ok(())
        }
    }

    #[test]
    fn test_refine_narrows_to_slave() {
        let caps = slave_caps();
        let mut params = HwParams::any();
        hw_refine_slave(&mut params, &LinkedRefine::copying(), refine_against(&caps)).unwrap();

        assert_eq!(params.interval(ParamKind::Rate), Interval::new(8000, 48000));
        assert_eq!(params.format_mask(), Mask::formats(&[Format::S16Le, Format::S32Le]));
        assert_eq!(params.access_mask(), Access::shm_mask());
        assert!(!params.info.contains(PcmInfo::MMAP));
    }

    #[test]
    fn test_refine_is_idempotent() {
        let caps = slave_caps();
        let hooks = LinkedRefine::copying();
        let mut params = HwParams::any();
        params.set_rate(44100).unwrap();
        hw_refine_slave(&mut params, &hooks, refine_against(&caps)).unwrap();
        let once = params.clone();
        hw_refine_slave(&mut params, &hooks, refine_against(&caps)).unwrap();
        assert!(params.same_constraints(&once));
    }

    #[test]
    fn test_switching_leaves_format_open() {
        let caps = slave_caps();
        let hooks = LinkedRefine::switching();
        let mut params = HwParams::any();
        hw_refine_slave(&mut params, &hooks, refine_against(&caps)).unwrap();

        assert!(params.format_mask().test(Format::FloatLe.index()));
        assert!(params.format_mask().test(Format::S24_3Le.index()));
        assert_eq!(params.interval(ParamKind::Rate), Interval::new(8000, 48000));
        assert_eq!(params.interval(ParamKind::Channels), Interval::new(1, 2));

        params.set_format(Format::FloatLe).unwrap();
        hw_refine_slave(&mut params, &hooks, refine_against(&caps)).unwrap();
        assert_eq!(params.format().unwrap(), Format::FloatLe);
    }

    #[test]
    fn test_refine_incompatible() {
        let caps = slave_caps();
        let mut params = HwParams::any();
        params.set_rate(96000).unwrap();
        let err = hw_refine_slave(&mut params, &LinkedRefine::copying(), refine_against(&caps))
            .unwrap_err();
        assert!(matches!(err, Error::IncompatibleParams(ParamKind::Rate)));
    }

    struct Oscillating;

    impl RefineHooks for Oscillating {
        fn cprepare(&self, _params: &mut HwParams) -> Result<()> {
            Ok(())
        }
        fn sprepare(&self, sparams: &mut HwParams) -> Result<()> {
            sparams.reset_any();
            Ok(())
        }
        fn schange(&self, _params: &HwParams, _sparams: &mut HwParams) -> Result<()> {
            Ok(())
        }
        fn cchange(&self, params: &mut HwParams, _sparams: &HwParams) -> Result<()> {
            // Marks a change on every pass without narrowing anything
            params.merge_cmask(ParamMask::only(ParamKind::Rate));
            Ok(())
        }
    }

    #[test]
    fn test_refine_iteration_bound() {
        let mut params = HwParams::any();
        let err = hw_refine_slave(&mut params, &Oscillating, |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::NotConverged(MAX_REFINE_ITERATIONS)));
    }

    #[test]
    fn test_commit_runs_cchange_on_failure() {
        let mut params = HwParams::any();
        params.set_format(Format::S16Le).unwrap();
        let mut seen = None;
        let err = hw_params_slave(&mut params, &LinkedRefine::copying(), |sparams| {
            seen = Some(sparams.format_mask());
            Err(Error::Backend("refused".into()))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        assert_eq!(seen, Some(Mask::formats(&[Format::S16Le])));
        assert_eq!(params.format().unwrap(), Format::S16Le);
    }
}
