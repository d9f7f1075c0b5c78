pub mod estimator;
pub mod selector;

pub use estimator::{
    BpeEstimator, HeuristicEstimator, TokenEstimator, MESSAGE_OVERHEAD_TOKENS,
};
pub use selector::{
    ContextSelector, SelectorConfig, DEFAULT_MAX_PAIRS, REPLY_BUFFER_TOKENS,
};
