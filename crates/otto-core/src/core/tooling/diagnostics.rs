pub mod commands {
    pub const INIT: &str = "OT101";
    pub const IMPORT: &str = "OT102";
    pub const STAGE: &str = "OT103";
    pub const LIST: &str = "OT104";
    pub const LAUNCH: &str = "OT105";
    pub const REAP: &str = "OT106";
    pub const DOCTOR: &str = "OT107";
    pub const GENERIC: &str = "OT000";
}

pub mod launcher {
    pub const DATABASE_UNAVAILABLE: &str = "OT501";
    pub const NO_LAUNCHABLE_UPDATE: &str = "OT502";
}

pub mod store {
    pub const DUPLICATE_UPDATE: &str = "OT800";
    pub const UNKNOWN_UPDATE: &str = "OT801";
    pub const INVALID_TRANSITION: &str = "OT802";
    pub const MISSING_OR_CORRUPT: &str = "OT803";
    pub const STORE_WRITE_FAILURE: &str = "OT810";
    pub const INDEX_CORRUPT: &str = "OT811";
    pub const FORMAT_INCOMPATIBLE: &str = "OT812";
}
