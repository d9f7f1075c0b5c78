//! Conversation state and context-assembly engine for an LLM chat client.
//!
//! The crate owns everything between the input box and the wire:
//!
//! - [`models::ConversationStore`]: conversations, selection, banners
//!   and in-flight flags, hydrated from a versioned local cache
//! - [`context::ContextSelector`]: token-budgeted context windows built
//!   from complete user/assistant pairs
//! - [`services::ChatService`]: optimistic send with bounded retry that
//!   preserves message identity
//! - [`services::SyncService`]: cursor-paginated reconciliation with the
//!   server, single-flighted batch pushes
//! - [`services::SearchService`]: local substring filter or server
//!   full-text query
//!
//! Failures on the send path land on the offending message and its
//! conversation banner; background persistence failures are logged and
//! dropped, never rolled back into a chat turn the user already saw.

pub mod api;
pub mod context;
pub mod models;
pub mod repositories;
pub mod services;

pub use api::{ApiClient, ApiError};
pub use context::{BpeEstimator, ContextSelector, HeuristicEstimator, TokenEstimator};
pub use models::{
    Conversation, ConversationStore, DeliveryState, ErrorCode, Identity, Message, MessageRole,
};
pub use services::{
    BackgroundQueue, ChatConfig, ChatService, SearchService, SendOptions, SendOutcome,
    SyncOutcome, SyncService,
};
