#![deny(unsafe_code)]

/// Chat client: transcript grouping, presence, scrolling and the session controller.
pub mod chat;
pub mod error;
pub mod markdown;
/// Layered settings loading.
pub mod settings;
/// Terminal front-end used by the `parley` binary.
pub mod terminal;
