use thiserror::Error;

/// Faults that end a scheduler run. Per-member and per-day faults are
/// absorbed into the run report instead.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("another jvault run holds {0}")]
    Locked(String),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("checkpoint {path} is unreadable: {reason}")]
    CheckpointCorrupt { path: String, reason: String },
    #[error("failed to persist checkpoint {path}: {reason}")]
    CheckpointWrite { path: String, reason: String },
    #[error("no archive exists yet for {categories}; run gap-fill first")]
    NoHighWaterMark { categories: String },
    #[error("cannot determine high-water mark: {0}")]
    HighWaterMark(String),
}

impl VaultError {
    pub fn code(&self) -> VaultErrorCode {
        match self {
            Self::Locked(_) => VaultErrorCode::E001Locked,
            Self::InvalidConfig(_) => VaultErrorCode::E002ConfigInvalid,
            Self::CheckpointCorrupt { .. } | Self::CheckpointWrite { .. } => {
                VaultErrorCode::E003CheckpointCorrupt
            }
            Self::NoHighWaterMark { .. } | Self::HighWaterMark(_) => {
                VaultErrorCode::E004NoHighWaterMark
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultErrorCode {
    E001Locked,
    E002ConfigInvalid,
    E003CheckpointCorrupt,
    E004NoHighWaterMark,
    E101BackendFault,
    E102CorruptIndex,
    E103UpstreamSkipped,
    E104StagingFault,
    E105InvalidMember,
    E106SuspectYear,
}

impl VaultErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002ConfigInvalid => "E002_CONFIG_INVALID",
            Self::E003CheckpointCorrupt => "E003_CHECKPOINT_CORRUPT",
            Self::E004NoHighWaterMark => "E004_NO_HIGH_WATER_MARK",
            Self::E101BackendFault => "E101_BACKEND_FAULT",
            Self::E102CorruptIndex => "E102_CORRUPT_INDEX",
            Self::E103UpstreamSkipped => "E103_UPSTREAM_SKIPPED",
            Self::E104StagingFault => "E104_STAGING_FAULT",
            Self::E105InvalidMember => "E105_INVALID_MEMBER",
            Self::E106SuspectYear => "E106_SUSPECT_YEAR",
        }
    }
}
