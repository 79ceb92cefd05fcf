use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("ABI decode error: {0}")]
    AbiDecode(String),

    #[error("Unsupported ABI type: {0}")]
    AbiUnsupportedType(String),

    #[error("ABI encode error: {0}")]
    AbiEncode(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Call reverted: {target} (index {index})")]
    PartialCallFailure { target: String, index: usize },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Unknown network: {0}")]
    UnknownNetwork(u64),

    #[error("No provider configured for chain {0}")]
    MissingProvider(u64),

    #[error("Stale poll cycle {seq} for chain {chain_id}")]
    StaleCycle { chain_id: u64, seq: u64 },

    #[error("Store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, PollError>;

impl PollError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::AbiDecode(message.into())
    }

    pub fn unsupported_type(ty: impl Into<String>) -> Self {
        Self::AbiUnsupportedType(ty.into())
    }

    pub fn encode(message: impl Into<String>) -> Self {
        Self::AbiEncode(message.into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    /// Only transport failures are worth another attempt; everything else is
    /// deterministic for the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Short tag used in structured log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AbiDecode(_) => "abi_decode",
            Self::AbiUnsupportedType(_) => "abi_unsupported_type",
            Self::AbiEncode(_) => "abi_encode",
            Self::Transport(_) => "transport",
            Self::PartialCallFailure { .. } => "partial_call_failure",
            Self::InvalidAddress(_) => "invalid_address",
            Self::InvalidParams(_) => "invalid_params",
            Self::UnknownNetwork(_) => "unknown_network",
            Self::MissingProvider(_) => "missing_provider",
            Self::StaleCycle { .. } => "stale_cycle",
            Self::Store(_) => "store",
        }
    }
}
