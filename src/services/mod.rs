pub mod background;
pub mod chat_service;
pub mod search_service;
pub mod sync_service;
pub mod telemetry;
pub mod titles;

pub use background::{BackgroundQueue, DEFAULT_QUEUE_CAPACITY};
pub use chat_service::{ChatConfig, ChatService, SendOptions, SendOutcome};
pub use search_service::SearchService;
pub use sync_service::{SyncOutcome, SyncService, DEFAULT_PAGE_SIZE};
pub use telemetry::{hash_session_id, Telemetry};
pub use titles::{clean_title, derive_title};
