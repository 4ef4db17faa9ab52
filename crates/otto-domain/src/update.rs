use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

/// Launch-time constraints, e.g. `{"channel": "beta"}`. Compared against each
/// update's filter metadata by [`crate::policy::matches_filters`].
pub type FilterMap = IndexMap<String, String>;

/// Identity of an update, taken from its manifest (`releaseId` or `id`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateId(Uuid);

impl UpdateId {
    #[must_use]
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for UpdateId {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(value)?))
    }
}

/// Lifecycle states persisted per update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStatus {
    Embedded,
    Downloading,
    Ready,
    Launched,
    Deprecated,
}

/// Transitions the store will accept. Self-edges on `ready` and `launched`
/// keep the marking operations idempotent; `launched -> ready` is the demotion
/// applied when a different update takes over.
const TRANSITIONS: &[(UpdateStatus, UpdateStatus)] = &[
    (UpdateStatus::Embedded, UpdateStatus::Ready),
    (UpdateStatus::Downloading, UpdateStatus::Ready),
    (UpdateStatus::Ready, UpdateStatus::Ready),
    (UpdateStatus::Ready, UpdateStatus::Launched),
    (UpdateStatus::Ready, UpdateStatus::Deprecated),
    (UpdateStatus::Ready, UpdateStatus::Downloading),
    (UpdateStatus::Launched, UpdateStatus::Launched),
    (UpdateStatus::Launched, UpdateStatus::Ready),
];

impl UpdateStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::Downloading => "downloading",
            Self::Ready => "ready",
            Self::Launched => "launched",
            Self::Deprecated => "deprecated",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "embedded" => Some(Self::Embedded),
            "downloading" => Some(Self::Downloading),
            "ready" => Some(Self::Ready),
            "launched" => Some(Self::Launched),
            "deprecated" => Some(Self::Deprecated),
            _ => None,
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        TRANSITIONS
            .iter()
            .any(|(from, to)| *from == self && *to == next)
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One content-addressed file referenced by an update.
///
/// `hash` is the lowercase hex SHA-256 that addresses the file in the store.
/// Legacy manifests do not declare content hashes, so their assets carry a
/// derived placeholder (`hash_derived`) that the importer replaces with the
/// real digest once the payload is on disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub key: Option<String>,
    pub hash: String,
    pub url: Option<Url>,
    pub size: Option<u64>,
    pub is_launch_asset: bool,
    #[serde(default)]
    pub hash_derived: bool,
}

impl Asset {
    /// Name used to locate the payload file in an import directory and to key
    /// the launch asset map. Falls back to the hash for key-less assets.
    #[must_use]
    pub fn file_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.hash)
    }
}

/// The uniform in-memory shape every manifest format normalizes into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub id: UpdateId,
    /// Unix milliseconds; the ordering key for "newest wins".
    pub commit_time: i64,
    pub runtime_version: String,
    pub status: UpdateStatus,
    /// Flat string map the selection policies match launch filters against.
    pub filter_metadata: IndexMap<String, String>,
    /// The manifest body as parsed, kept verbatim for round-tripping.
    pub manifest: Value,
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub successful_launch_count: u32,
    #[serde(default)]
    pub failed_launch_count: u32,
}

impl Update {
    #[must_use]
    pub fn launch_asset(&self) -> Option<&Asset> {
        self.assets.iter().find(|asset| asset.is_launch_asset)
    }

    /// True when this update has crashed on every launch so far. The launcher
    /// excludes such updates from selection; the embedded update is exempt.
    #[must_use]
    pub fn failed_only(&self) -> bool {
        self.failed_launch_count > 0 && self.successful_launch_count == 0
    }
}
