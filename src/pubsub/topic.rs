//! Topic filter matching.
//!
//! Topics are `/`-separated levels. A subscription filter may use `+` to
//! match exactly one level and a trailing `#` to match every remaining
//! level (including none), so `/topic/#` receives `/topic/room1`.

/// Returns `true` if `topic` is selected by `filter`.
#[must_use]
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Returns `true` if `filter` contains a wildcard level.
#[must_use]
pub fn is_wildcard(filter: &str) -> bool {
    filter.split('/').any(|level| level == "#" || level == "+")
}
