// Small helpers shared by the pipeline

/// Make a resource title safe to use as a filename stem.
///
/// Path separators and other characters that are unsafe on at least one
/// platform are replaced with underscores. `%` is included because the
/// stem is passed to yt-dlp's output template, where it would otherwise be
/// interpreted as a template field.
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '%' => '_',
            '\0'..='\x1f' => '_',
            other => other,
        })
        .collect();
    let trimmed = replaced
        .trim()
        .trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Last meaningful lines of a process's stderr, joined for an error
/// message. Keeps the original order.
pub fn stderr_tail(stderr: &str, max_lines: usize) -> String {
    let mut tail: Vec<&str> = stderr
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .rev()
        .take(max_lines)
        .collect();
    tail.reverse();
    if tail.is_empty() {
        "process exited with an error".to_string()
    } else {
        tail.join(" | ")
    }
}
