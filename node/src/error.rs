use crate::role::IllegalTransition;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed datagram: {0}")]
    Codec(#[from] bincode::Error),

    #[error(transparent)]
    Role(#[from] IllegalTransition),

    #[error("no free region for a new snake")]
    NoFreeRegion,

    #[error("game not found: {0}")]
    GameNotFound(String),

    #[error("join rejected: {0}")]
    JoinRejected(String),

    #[error("no authoritative node available")]
    NoAuthoritativeNode,
}

pub type Result<T> = std::result::Result<T, NodeError>;
