/// Character budget for an auto-derived title.
const AUTO_TITLE_CHARS: usize = 50;

/// Derive a conversation title from the first user message: first ~50
/// characters, cut at a word boundary where one is near.
pub fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    let first_line = trimmed.lines().next().unwrap_or(trimmed);

    if first_line.chars().count() <= AUTO_TITLE_CHARS {
        return clean_title(first_line);
    }

    let head: String = first_line.chars().take(AUTO_TITLE_CHARS).collect();
    // Prefer cutting on the last space unless it would eat most of the title.
    let cut = match head.rfind(' ') {
        Some(pos) if pos > AUTO_TITLE_CHARS / 2 => &head[..pos],
        _ => head.as_str(),
    };
    clean_title(&format!("{}…", cut.trim_end()))
}

/// Clean and validate a title: strip wrapping quotes, keep the first
/// line, cap the length.
pub fn clean_title(raw_title: &str) -> String {
    let cleaned = raw_title
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .lines()
        .next()
        .unwrap_or("New Chat")
        .trim()
        .to_string();

    if cleaned.chars().count() > 100 {
        let head: String = cleaned.chars().take(97).collect();
        format!("{}...", head)
    } else if cleaned.is_empty() {
        "New Chat".to_string()
    } else {
        cleaned
    }
}
