use copydesk_llm::provider::ChatMessage;

use crate::types::SuggestionRequest;

/// Build the system + user messages for a rewrite request.
///
/// The system message carries the caller's style guide verbatim; the user
/// message carries the text to rewrite and its optional spec.
pub fn build_messages(req: &SuggestionRequest, options: usize) -> Vec<ChatMessage> {
    let style_guide = req.style_guide_text.as_deref().unwrap_or_default();
    let mut system = String::with_capacity(256 + style_guide.len());
    system.push_str("You are a product copywriting assistant.\n\n");
    system.push_str("Follow the complete style guide below. Every output MUST comply with all writing rules.\n\n");
    system.push_str("=== STYLE GUIDE ===\n");
    system.push_str(style_guide.trim());
    system.push_str("\n=====================");

    let spec = req
        .extra_context
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("none");

    let user = format!(
        "Rewrite this UI copy:\n\n- Text: \"{}\"\n- Spec: \"{spec}\"\n\nGive {options} concise, well-formatted rewrite options.",
        req.node_text.as_deref().unwrap_or_default(),
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}
