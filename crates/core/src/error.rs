use crate::domain::price::MetalType;

/// Failures that abort one acquisition cycle. None of them are fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("feed fetch failed: {0:#}")]
    Fetch(anyhow::Error),

    #[error("feed parse failed: {0}")]
    Parse(#[from] ParseError),

    #[error("price store failed: {0:#}")]
    Store(anyhow::Error),
}

impl CycleError {
    pub fn stage(&self) -> &'static str {
        match self {
            CycleError::Fetch(_) => "fetch",
            CycleError::Parse(_) => "parse",
            CycleError::Store(_) => "store",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("metal not found: {0}")]
    MetalNotFound(MetalType),

    #[error("invalid {metal} price: {raw:?}")]
    InvalidPrice { metal: MetalType, raw: String },
}
