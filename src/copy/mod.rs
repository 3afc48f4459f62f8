//! Copying a replica from a remote node.

pub mod client;
pub mod protocol;
pub mod server;

use crate::error::ToolError;
use crate::hostport::HostPort;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub bytes: u64,
}

/// Three-phase copy: handshake with the source, stream every file, then
/// commit locally. Each phase requires the previous one to have succeeded.
pub trait CopyClient {
    fn start(&mut self, source: &HostPort) -> Result<(), ToolError>;

    fn fetch_all(&mut self) -> Result<CopyStats, ToolError>;

    fn finish(&mut self) -> Result<(), ToolError>;
}

pub fn copy_from_remote<C: CopyClient>(
    client: &mut C,
    source: &HostPort,
) -> Result<CopyStats, ToolError> {
    client.start(source)?;
    let stats = client.fetch_all()?;
    client.finish()?;
    Ok(stats)
}
