//! Built-in PCM types
//!
//! Leaf devices (`null`, `buffer`, `cpal`) own a ring buffer and a backend.
//! Plugins (`copy`, `fswitch`) stack on a slave opened through the
//! registry. Every type is reachable by name from [`builtin`].

pub mod buffer;
pub mod copy;
#[cfg(feature = "cpal")]
pub mod cpal;
pub mod fswitch;
pub mod leaf;
pub mod null;

use std::sync::Arc;

use crate::error::Result;
use crate::pcm::Pcm;
use crate::registry::OpenRequest;

/// Constructor of a PCM type
pub type PcmOpenFn = fn(&OpenRequest<'_>) -> Result<Pcm>;

fn open_null(req: &OpenRequest<'_>) -> Result<Pcm> {
    req.def.check_fields(&[])?;
    null::open(req.def.name, req.stream, req.mode)
}

fn open_buffer(req: &OpenRequest<'_>) -> Result<Pcm> {
    let caps = buffer::BufferCaps::from_definition(&req.def)?;
    let tap = req.registry.tap(req.def.name);
    buffer::open(req.def.name, req.stream, req.mode, caps, tap)
}

fn open_copy(req: &OpenRequest<'_>) -> Result<Pcm> {
    copy::CopyPcm::open_definition(&req.def, req.stream, req.mode, req.registry)
}

fn open_fswitch(req: &OpenRequest<'_>) -> Result<Pcm> {
    let opener = Arc::new(req.registry.clone());
    fswitch::FormatSwitch::open_definition(&req.def, req.stream, req.mode, opener)
}

#[cfg(feature = "cpal")]
fn open_cpal(req: &OpenRequest<'_>) -> Result<Pcm> {
    cpal::open_definition(&req.def, req.stream, req.mode)
}

/// Built-in constructors, sorted by name
#[cfg(feature = "cpal")]
static BUILTINS: &[(&str, PcmOpenFn)] = &[
    ("buffer", open_buffer),
    ("copy", open_copy),
    ("cpal", open_cpal),
    ("fswitch", open_fswitch),
    ("null", open_null),
];

/// Built-in constructors, sorted by name
#[cfg(not(feature = "cpal"))]
static BUILTINS: &[(&str, PcmOpenFn)] = &[
    ("buffer", open_buffer),
    ("copy", open_copy),
    ("fswitch", open_fswitch),
    ("null", open_null),
];

/// Constructor of the built-in type `type_name`; names are case-sensitive
pub fn builtin(type_name: &str) -> Option<PcmOpenFn> {
    BUILTINS
        .binary_search_by(|(name, _)| (*name).cmp(type_name))
        .ok()
        .map(|i| BUILTINS[i].1)
}

/// Names of all built-in types
pub fn builtin_types() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_sorted() {
        let names: Vec<&str> = builtin_types().collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_builtin_lookup() {
        assert!(builtin("fswitch").is_some());
        assert!(builtin("null").is_some());
        assert!(builtin("FSWITCH").is_none());
        assert!(builtin("plug").is_none());
    }
}
