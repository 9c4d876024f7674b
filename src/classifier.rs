use std::sync::LazyLock;

use regex::Regex;

use crate::source::Post;

/// A numbered confession opens the text, or a line, with 4 to 7 digits and a
/// period, e.g. `12345. ...`.
static CONFESSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\r\n]+)([0-9]{4,7})\.").expect("confession pattern is a valid regex")
});

/// Decide whether a post is a confession.
///
/// Posts without text never qualify.
pub fn is_confession(post: &Post) -> bool {
    post.text
        .as_deref()
        .is_some_and(|text| CONFESSION_PATTERN.is_match(text))
}

/// The number of the first confession in the post, if any.
pub fn confession_number(post: &Post) -> Option<u32> {
    let text = post.text.as_deref()?;
    CONFESSION_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(text: Option<&str>) -> Post {
        Post::new("1", text, "https://facebook.com/1")
    }

    #[test]
    fn numbered_text_qualifies() {
        assert!(is_confession(&post(Some("1234. hello"))));
        assert!(is_confession(&post(Some("1234567. seven digits"))));
    }

    #[test]
    fn number_after_line_break_qualifies() {
        assert!(is_confession(&post(Some("Intro line\n45678. the confession"))));
        assert!(is_confession(&post(Some("Intro\r\n\r\n45678. windows breaks"))));
    }

    #[test]
    fn other_text_does_not_qualify() {
        assert!(!is_confession(&post(Some("no digits here"))));
        assert!(!is_confession(&post(Some("123. too short"))));
        assert!(!is_confession(&post(Some("12345678. too long"))));
        assert!(!is_confession(&post(Some("12345 missing period"))));
        assert!(!is_confession(&post(Some("see 12345. mid-line"))));
        assert!(!is_confession(&post(Some(""))));
    }

    #[test]
    fn absent_text_never_qualifies() {
        assert!(!is_confession(&post(None)));
        assert_eq!(confession_number(&post(None)), None);
    }

    #[test]
    fn number_is_extracted() {
        assert_eq!(confession_number(&post(Some("Hi\n20481. text"))), Some(20481));
        assert_eq!(confession_number(&post(Some("nothing"))), None);
    }
}
