use thiserror::Error;

use super::BoxFuture;
use crate::reading::RawSnapshot;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("device protocol error: {0}")]
    Protocol(String),
}

/// One full register sweep from the remote device. Callers must hold the
/// poll lock: the client is not safe to invoke concurrently from one process.
pub trait DeviceClient: Send + Sync {
    fn fetch_snapshot(&self) -> BoxFuture<'_, Result<RawSnapshot, DeviceError>>;
}
