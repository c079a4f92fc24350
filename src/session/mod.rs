pub mod controller;
pub mod handle;
pub mod manager;

pub use controller::{ChatSession, HistoryState, SessionDeps, SessionSettings, SessionStatus};
pub use handle::SessionHandle;
pub use manager::ConversationManager;
