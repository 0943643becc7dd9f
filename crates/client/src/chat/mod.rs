/// Event contracts between the controller and its background tasks.
pub mod events;
pub mod grouping;
/// Transcript entities as the front-end sees them.
pub mod message;
pub mod message_list;
pub mod presence;
pub mod scroll_manager;
pub mod sidebar;
pub mod title;
pub mod view;

pub use events::{ChatCommand, ChatEvent};
pub use grouping::{GroupKind, MessageGroup, group_messages};
pub use message::{Message, MessageId, Role, Session, SessionId};
pub use message_list::{MessageList, TranscriptRow};
pub use presence::{AwaitingReply, is_thinking, show_indicator, thinking_phrase};
pub use scroll_manager::{ScrollBehavior, ScrollCommand, ScrollManager, TranscriptChange};
pub use sidebar::SessionListItem;
pub use title::derive_session_title;
pub use view::{ChatEvents, ChatOptions, ChatView};
