use crate::error::ToolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host:port`. The port is split off at the last ':' so bracketed
    /// IPv6 hosts parse too.
    pub fn parse(input: &str) -> Result<Self, ToolError> {
        let Some((host, port)) = input.rsplit_once(':') else {
            return Err(ToolError::InvalidArgument(format!(
                "'{input}' is missing a port"
            )));
        };
        if host.is_empty() {
            return Err(ToolError::InvalidArgument(format!(
                "'{input}' has an empty host"
            )));
        }
        if port.is_empty() {
            return Err(ToolError::InvalidArgument(format!(
                "'{input}' is missing a port"
            )));
        }
        let port = port.parse::<u16>().map_err(|e| {
            ToolError::InvalidArgument(format!("'{input}' has an invalid port: {e}"))
        })?;
        Ok(Self::new(host, port))
    }

    /// Like [`HostPort::parse`] but rejects port 0.
    pub fn parse_nonzero(input: &str) -> Result<Self, ToolError> {
        let hp = Self::parse(input)?;
        if hp.port == 0 {
            return Err(ToolError::InvalidArgument(format!(
                "'{input}' has port of 0"
            )));
        }
        Ok(hp)
    }
}

impl FromStr for HostPort {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_nonzero(s)
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
