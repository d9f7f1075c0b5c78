pub mod client;
pub mod error;
pub mod types;

pub use client::{ApiClient, MAX_QUERY_CHARS, MIN_QUERY_CHARS};
pub use error::{ApiError, ApiResult};
pub use types::{
    ChatRequest, ChatResponse, ClearAllResponse, DeleteResponse, ListConversationsResponse,
    ListMeta, MessagesResponse, OutboundMessage, PersistImagesRequest, PersistImagesResponse,
    SaveMessagesRequest, SaveMessagesResponse, SearchResponse, SyncPushRequest,
    SyncPushResponse, TelemetryEvent, TelemetryRequest, TelemetryResponse, UpdateTitleRequest,
    UpdateTitleResponse, WireUsage,
};
