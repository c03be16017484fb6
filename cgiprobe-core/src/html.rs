use std::borrow::Cow;

/// Escape `&`, `<` and `>` for use as HTML text.
///
/// Returns the input unchanged (borrowed) when it contains none of them.
pub fn escape(input: &str) -> Cow<'_, str> {
    if !input.contains(&['&', '<', '>'][..]) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len() + 16);
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}
