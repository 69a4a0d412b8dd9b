/// Escapes the characters the notification channel treats as markup.
pub fn escape(text: Option<&str>) -> Option<String> {
    text.map(escape_str)
}

pub fn escape_str(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}
