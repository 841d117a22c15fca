use std::fmt::Display;

/// Text relayed from the station to the field unit. Only lowercase ascii
/// alphanumerics and spaces survive construction, so anything holding a
/// `TextPayload` can hand it straight to the Morse encoder.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextPayload(String);

impl TextPayload {
    /// Sanitise raw decoded text into a payload.
    pub fn new(raw: &str) -> Self {
        Self(sanitize(raw))
    }

    /// An empty payload is valid but ends the secondary flow without playback.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the sanitised text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes as they go on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Display for TextPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip a string down to lowercase ascii alphanumerics and spaces.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("SOS", "sos")]
    #[case("Hello, World!", "hello world")]
    #[case("  tabs\tand\nnewlines ", "  tabsandnewlines ")]
    #[case("élan 42", "lan 42")]
    #[case("!!!", "")]
    #[case("", "")]
    fn test_sanitize(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize(raw), expected);
    }

    #[rstest]
    #[case("Mixed CASE with Ümlauts & symbols #1")]
    #[case("already clean")]
    #[case("\u{0}\u{7f}ctrl")]
    #[case("")]
    fn test_sanitize_is_idempotent(#[case] raw: &str) {
        let once = sanitize(raw);
        assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn test_payload_is_sanitised() {
        let payload = TextPayload::new("Meet @ 9PM");
        assert_eq!(payload.as_str(), "meet  9pm");
        assert!(!payload.is_empty());
        assert!(TextPayload::new("?!").is_empty());
    }
}
