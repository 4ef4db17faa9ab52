//! CLI-facing diagnostics and outcome shaping.

pub(crate) mod diagnostics;
pub(crate) mod outcome;
