pub mod config;
pub mod conversation;
pub mod decoder;
pub mod error;
pub mod interpreter;
pub mod mode;
pub mod protocol;
pub mod session;
pub mod state;
pub mod storage;
pub mod transport;

// Re-export main types for convenience
pub use config::Config;
pub use conversation::Conversation;
pub use decoder::FrameDecoder;
pub use error::{ChatError, ChatResult};
pub use interpreter::{DecodedEvent, EventInterpreter, Step};
pub use mode::Mode;
pub use protocol::{Article, BackendStatus, ChatRequest, ResultItem, SearchResponse, StudyDocument};
pub use session::{
    ChatSession, ExchangeObserver, ExchangeOutcome, NoopObserver, SessionEvent, SessionOptions,
};
pub use state::{ChatRole, ConversationHistory, ConversationTurn, ExchangePhase, ExchangeState};
pub use storage::{Bookmarks, SearchHistory, Store, Theme, UsageStats};
pub use transport::{ChatResponse, HttpTransport, Transport};
