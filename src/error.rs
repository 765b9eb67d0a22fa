//! Cross-plugin error taxonomy (spec §4.J / §7).

use thiserror::Error;

/// Every public operation in this crate returns `Result<T, BlockdevError>`.
#[derive(Debug, Error)]
pub enum BlockdevError {
    #[error("technology not available: {0}")]
    TechUnavail(String),

    #[error("dependency check failed: {0}")]
    DepsFailed(String),

    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("process reported exit code {status}: {message}")]
    ProcessFailed { status: i32, message: String },

    #[error("process exited 0 but produced no output on stdout: {stderr}")]
    NoOutput { stderr: String },

    #[error("failed to parse output: {0}")]
    Parse(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation requires root privileges")]
    NotRoot,

    #[error("drive is in low-power mode, refusing SMART query")]
    DriveSleeping,

    #[error("fabrics connect: subsystem already exists")]
    ConnectAlreadyExists,

    #[error("fabrics connect: invalid arguments")]
    ConnectInvalid,

    #[error("fabrics connect: address already in use")]
    ConnectAddrInUse,

    #[error("fabrics connect: no such device")]
    ConnectNoDev,

    #[error("fabrics connect: operation not supported")]
    ConnectOpNotSupp,

    #[error("fabrics connect: connection refused")]
    ConnectRefused,

    #[error("fabrics connect failed: {0}")]
    Connect(String),

    #[error("no matching NVMe subsystem found")]
    NoMatch,

    #[error("plugin runtime already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BlockdevError>;

/// Map an NVMe-fabrics `connect` errno into the taxonomy's `Connect*` family,
/// mirroring `nvme-fabrics.c`'s errno switch.
pub fn connect_error_from_errno(errno: i32) -> BlockdevError {
    match errno {
        libc::EEXIST => BlockdevError::ConnectAlreadyExists,
        libc::EINVAL => BlockdevError::ConnectInvalid,
        libc::EADDRINUSE => BlockdevError::ConnectAddrInUse,
        libc::ENODEV => BlockdevError::ConnectNoDev,
        libc::EOPNOTSUPP => BlockdevError::ConnectOpNotSupp,
        libc::ECONNREFUSED => BlockdevError::ConnectRefused,
        other => BlockdevError::Connect(format!("errno {other}")),
    }
}
