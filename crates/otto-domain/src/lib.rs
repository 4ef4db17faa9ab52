#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod manifest;
pub mod policy;
pub mod update;

pub use manifest::{
    check_filter_consistency, parse_manifest, ManifestConfig, ManifestError, ManifestFormat,
};
pub use policy::{matches_filters, FilterAwarePolicy, SelectionPolicy, SingleUpdatePolicy};
pub use update::{Asset, FilterMap, Update, UpdateId, UpdateStatus};
