// Consistent exit codes for the docmirror CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error (unknown doctype, not a table field)
//   3  = malformed payload file
//   4  = device cache failure
//   13 = transport error

use std::process;

use docmirror_common::PayloadError;
use docmirror_core::store::device_cache::DeviceCacheError;
use docmirror_core::MirrorError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Payload = 3,
    Cache = 4,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(mirror_err) = cause.downcast_ref::<MirrorError>() {
                return Self::from_mirror_error(mirror_err);
            }
            if cause.downcast_ref::<PayloadError>().is_some()
                || cause.downcast_ref::<serde_json::Error>().is_some()
            {
                return Self::Payload;
            }
            if cause.downcast_ref::<DeviceCacheError>().is_some() {
                return Self::Cache;
            }
        }
        Self::Error
    }

    pub fn from_mirror_error(err: &MirrorError) -> Self {
        match err {
            MirrorError::SchemaNotLoaded(_)
            | MirrorError::NotFound(_)
            | MirrorError::NotATableField { .. } => Self::Usage,
            MirrorError::Payload(_) => Self::Payload,
            MirrorError::Cache(_) => Self::Cache,
            MirrorError::Transport(_) => Self::Network,
            MirrorError::Trigger { .. } => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
