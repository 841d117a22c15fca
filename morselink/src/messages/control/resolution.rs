use crate::errors::ResolutionError;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// Camera resolution requested by the station, sent over the wire as
/// plain ascii `<width>x<height>`.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Resolutions the station operator can pick from.
pub const RESOLUTION_OPTIONS: [Resolution; 4] = [
    Resolution::new(176, 144),
    Resolution::new(160, 120),
    Resolution::new(800, 600),
    Resolution::new(1184, 656),
];

/// Largest width or height a frame can be scaled to.
pub const MAX_DIMENSION: u32 = 4096;

impl Resolution {
    /// Create a resolution from its dimensions.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when both dimensions are between 1 and [`MAX_DIMENSION`].
    pub fn is_supported(&self) -> bool {
        (1..=MAX_DIMENSION).contains(&self.width) && (1..=MAX_DIMENSION).contains(&self.height)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        RESOLUTION_OPTIONS[0]
    }
}

impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        let (width, height) = trimmed
            .split_once('x')
            .ok_or_else(|| ResolutionError::Malformed(s.to_string()))?;

        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .ok()
                .filter(|d| (1..=MAX_DIMENSION).contains(d))
                .ok_or_else(|| ResolutionError::InvalidDimension(s.to_string()))
        };
        Ok(Self::new(parse(width)?, parse(height)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("800x600", Resolution::new(800, 600))]
    #[case("1184x656\n", Resolution::new(1184, 656))]
    #[case(" 160 x 120 ", Resolution::new(160, 120))]
    fn test_parse_resolution(#[case] raw: &str, #[case] expected: Resolution) {
        assert_eq!(raw.parse::<Resolution>(), Ok(expected));
    }

    #[rstest]
    #[case("800600")]
    #[case("")]
    #[case("x600")]
    #[case("800x")]
    #[case("0x600")]
    #[case("-800x600")]
    #[case("widexhigh")]
    #[case("4097x600")]
    #[case("4294967295x4294967295")]
    fn test_reject_malformed_resolution(#[case] raw: &str) {
        assert!(raw.parse::<Resolution>().is_err(), "{raw:?} should not parse");
    }

    #[test]
    fn test_display_matches_wire_format() {
        for option in RESOLUTION_OPTIONS {
            let text = option.to_string();
            assert_eq!(text.parse::<Resolution>(), Ok(option));
        }
        assert_eq!(Resolution::default().to_string(), "176x144");
    }

    #[test]
    fn test_supported_range() {
        assert!(Resolution::new(MAX_DIMENSION, MAX_DIMENSION).is_supported());
        assert!(!Resolution::new(MAX_DIMENSION + 1, 600).is_supported());
        assert!(!Resolution::new(800, 0).is_supported());
        assert_eq!(
            "4096x4096".parse::<Resolution>(),
            Ok(Resolution::new(4096, 4096))
        );
    }
}
