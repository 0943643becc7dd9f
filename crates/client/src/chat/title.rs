pub const TITLE_MAX_CHARS: usize = 40;
const TITLE_ELLIPSIS: &str = "...";

/// Titles a session after its first user message.
pub fn derive_session_title(content: &str) -> String {
    let content = content.trim();
    match content.char_indices().nth(TITLE_MAX_CHARS) {
        Some((cut, _)) => format!("{}{TITLE_ELLIPSIS}", &content[..cut]),
        None => content.to_string(),
    }
}
