use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Replica,
    RowGroup,
    Block,
    Column,
    ConsensusMetadata,
    Instance,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Replica => write!(f, "replica"),
            ResourceType::RowGroup => write!(f, "row group"),
            ResourceType::Block => write!(f, "block"),
            ResourceType::Column => write!(f, "column"),
            ResourceType::ConsensusMetadata => write!(f, "consensus metadata"),
            ResourceType::Instance => write!(f, "instance"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorCode {
    Io,
    Encode,
    Decode,
    InvalidArgument,
    ReplicaNotFound,
    RowGroupNotFound,
    BlockNotFound,
    ColumnNotFound,
    ConsensusMetadataNotFound,
    InstanceNotFound,
    PreconditionFailed,
    Protocol,
}

impl ToolErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolErrorCode::Io => "io",
            ToolErrorCode::Encode => "encode",
            ToolErrorCode::Decode => "decode",
            ToolErrorCode::InvalidArgument => "invalid_argument",
            ToolErrorCode::ReplicaNotFound => "replica_not_found",
            ToolErrorCode::RowGroupNotFound => "row_group_not_found",
            ToolErrorCode::BlockNotFound => "block_not_found",
            ToolErrorCode::ColumnNotFound => "column_not_found",
            ToolErrorCode::ConsensusMetadataNotFound => "consensus_metadata_not_found",
            ToolErrorCode::InstanceNotFound => "instance_not_found",
            ToolErrorCode::PreconditionFailed => "precondition_failed",
            ToolErrorCode::Protocol => "protocol",
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("io error on {context}: {source}")]
    IoAt {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error at {location}: {message}")]
    Decode { location: String, message: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ToolError {
    pub fn io_at(context: impl Into<String>, source: std::io::Error) -> Self {
        ToolError::IoAt {
            context: context.into(),
            source,
        }
    }

    pub fn decode(location: impl Into<String>, message: impl ToString) -> Self {
        ToolError::Decode {
            location: location.into(),
            message: message.to_string(),
        }
    }

    pub fn not_found(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        ToolError::NotFound {
            resource_type,
            resource_id: resource_id.into(),
        }
    }

    pub fn code(&self) -> ToolErrorCode {
        match self {
            ToolError::Io(_) | ToolError::IoAt { .. } => ToolErrorCode::Io,
            ToolError::Encode(_) => ToolErrorCode::Encode,
            ToolError::Decode { .. } => ToolErrorCode::Decode,
            ToolError::InvalidArgument(_) => ToolErrorCode::InvalidArgument,
            ToolError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Replica => ToolErrorCode::ReplicaNotFound,
                ResourceType::RowGroup => ToolErrorCode::RowGroupNotFound,
                ResourceType::Block => ToolErrorCode::BlockNotFound,
                ResourceType::Column => ToolErrorCode::ColumnNotFound,
                ResourceType::ConsensusMetadata => ToolErrorCode::ConsensusMetadataNotFound,
                ResourceType::Instance => ToolErrorCode::InstanceNotFound,
            },
            ToolError::PreconditionFailed(_) => ToolErrorCode::PreconditionFailed,
            ToolError::Protocol(_) => ToolErrorCode::Protocol,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// True when the error is an I/O failure whose underlying kind matches.
    pub fn is_io_kind(&self, kind: std::io::ErrorKind) -> bool {
        match self {
            ToolError::Io(e) => e.kind() == kind,
            ToolError::IoAt { source, .. } => source.kind() == kind,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ResourceType, ToolError, ToolErrorCode};

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(ToolErrorCode::ReplicaNotFound.as_str(), "replica_not_found");
        assert_eq!(
            ToolErrorCode::PreconditionFailed.as_str(),
            "precondition_failed"
        );
        assert_eq!(ToolErrorCode::InvalidArgument.as_str(), "invalid_argument");
    }

    #[test]
    fn error_code_str_matches_variant_mapping() {
        let err = ToolError::not_found(ResourceType::Replica, "abc");
        assert_eq!(err.code(), ToolErrorCode::ReplicaNotFound);
        assert_eq!(err.code_str(), "replica_not_found");
        assert_eq!(err.to_string(), "replica 'abc' not found");
    }

    #[test]
    fn io_context_is_part_of_message() {
        let err = ToolError::io_at(
            "block 0000000000000007",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(err.code(), ToolErrorCode::Io);
        assert!(err.is_io_kind(std::io::ErrorKind::NotFound));
        assert!(err.to_string().contains("block 0000000000000007"));
    }
}
