pub mod conversation;
pub mod conversation_store;
pub mod message;
pub mod token_usage;

pub use conversation::{Conversation, ConversationSummary, DEFAULT_TITLE};
pub use conversation_store::{
    CachedState, ConversationStore, ErrorBanner, Identity, PageCursor, CACHE_VERSION,
};
pub use message::{
    DeliveryState, ErrorCode, GeneratedImage, Message, MessageRole, SendFailure,
};
pub use token_usage::{corrected_usage, correction_for, TokenUsage, UsageCorrection};
