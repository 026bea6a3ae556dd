/// Split model output into individual suggestions.
///
/// Skips blank lines and code fences, strips a leading `1.` / `1)` enumerator,
/// and keeps at most `limit` non-empty results.
pub fn parse_suggestions(content: &str, limit: usize) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("```"))
        .map(|line| strip_enumerator(line).trim())
        .filter(|line| !line.is_empty())
        .take(limit)
        .map(str::to_owned)
        .collect()
}

fn strip_enumerator(line: &str) -> &str {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return line;
    }
    match line.as_bytes().get(digits) {
        Some(b'.' | b')') => &line[digits + 1..],
        _ => line,
    }
}
