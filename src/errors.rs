use alloy_primitives::Address;
use alloy_transport::TransportError;
use jsonrpsee::types::{error::INVALID_PARAMS_CODE, ErrorObject, ErrorObjectOwned};

/// code returned when the chain endpoint couldn't be reached
pub const CONNECTIVITY_ERROR_CODE: i32 = -32001;
/// code returned when the pool or its tokens returned unusable data
pub const CONTRACT_STATE_ERROR_CODE: i32 = -32002;
/// code returned when the packed price couldn't be decoded
pub const DECODE_ERROR_CODE: i32 = -32003;
/// code returned when an update couldn't be delivered
pub const TRANSPORT_ERROR_CODE: i32 = -32004;

/// Every error a streaming session can end with.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("chain endpoint unreachable - {0}")]
    Connectivity(#[from] TransportError),
    #[error("bad contract state - {0}")]
    ContractState(#[from] ContractStateError),
    #[error("failed to decode price - {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to deliver price update - {0}")]
    Transport(String),
    #[error("invalid request - {0}")]
    InvalidRequest(String),
}

impl StreamError {
    /// Only a failed round trip to the endpoint may clear up on its own; bad
    /// contract data or a bad decode will be bad again on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, StreamError::Connectivity(_))
    }

    pub fn code(&self) -> i32 {
        match self {
            StreamError::Connectivity(_) => CONNECTIVITY_ERROR_CODE,
            StreamError::ContractState(_) => CONTRACT_STATE_ERROR_CODE,
            StreamError::Decode(_) => DECODE_ERROR_CODE,
            StreamError::Transport(_) => TRANSPORT_ERROR_CODE,
            StreamError::InvalidRequest(_) => INVALID_PARAMS_CODE,
        }
    }
}

impl From<alloy_sol_types::Error> for StreamError {
    fn from(value: alloy_sol_types::Error) -> Self {
        StreamError::ContractState(ContractStateError::Abi(value))
    }
}

impl From<StreamError> for ErrorObjectOwned {
    fn from(error: StreamError) -> Self {
        ErrorObject::owned(error.code(), error.to_string(), None::<()>)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContractStateError {
    #[error("malformed return data - {0}")]
    Abi(#[from] alloy_sol_types::Error),
    #[error("call to {to:?} reverted - {message}")]
    Reverted { to: Address, message: String },
    #[error("no readable name for token {0:?}")]
    MissingTokenName(Address),
    #[error("endpoint serves chain {actual}, request expected {expected}")]
    ChainMismatch { expected: u64, actual: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("price overflows a 32-bit float")]
    Overflow,
    #[error("non-zero price rounds to zero as a 32-bit float")]
    Underflow,
    #[error("block height {0} doesn't fit in a signed 32-bit integer")]
    HeightOutOfRange(u64),
}
