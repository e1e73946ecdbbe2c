use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("pending index unavailable: {0}")]
    SourceUnavailable(String),
    #[error("pending index is not a valid case index: {0}")]
    InvalidIndexFormat(String),
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("case store read failed: {0}")]
    StoreReadError(String),
    #[error("case store write failed: {0}")]
    StoreWriteError(String),
    #[error("configuration invalid: {0}")]
    ConfigurationError(String),
    #[error("watcher daemon already running: {0}")]
    DaemonLocked(String),
}

impl IntakeError {
    pub fn code(&self) -> IntakeErrorCode {
        match self {
            Self::SourceUnavailable(_) => IntakeErrorCode::E001SourceUnavailable,
            Self::InvalidIndexFormat(_) => IntakeErrorCode::E002InvalidIndex,
            Self::UnsupportedFileType(_) => IntakeErrorCode::E003UnsupportedType,
            Self::StoreReadError(_) => IntakeErrorCode::E004StoreRead,
            Self::StoreWriteError(_) => IntakeErrorCode::E005StoreWrite,
            Self::ConfigurationError(_) => IntakeErrorCode::E006ConfigInvalid,
            Self::DaemonLocked(_) => IntakeErrorCode::E007Locked,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeErrorCode {
    E001SourceUnavailable,
    E002InvalidIndex,
    E003UnsupportedType,
    E004StoreRead,
    E005StoreWrite,
    E006ConfigInvalid,
    E007Locked,
}

impl IntakeErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001SourceUnavailable => "E001_SOURCE_UNAVAILABLE",
            Self::E002InvalidIndex => "E002_INVALID_INDEX",
            Self::E003UnsupportedType => "E003_UNSUPPORTED_TYPE",
            Self::E004StoreRead => "E004_STORE_READ",
            Self::E005StoreWrite => "E005_STORE_WRITE",
            Self::E006ConfigInvalid => "E006_CONFIG_INVALID",
            Self::E007Locked => "E007_LOCKED",
        }
    }
}
