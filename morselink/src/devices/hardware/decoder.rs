use crate::{
    devices::traits::{DecodedRegion, PatternDecoder},
    errors::{ConfigError, DecodeError, DeviceError},
    utils::yaml::read_config,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    io::Write,
    process::{Command, Stdio},
};
use tracing::debug;

/// Exit code of zbarimg when the image holds no symbol.
const NOTHING_FOUND: i32 = 4;

/// External program used to find QR patterns. It must read the encoded
/// frame on stdin and print a zbar xml report on stdout, exiting with 0
/// when symbols were found and 4 when there were none.
/// `zbarimg --xml -q -` does exactly that.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CommandDecoderConfig {
    /// Program to run.
    program: String,
    /// Arguments passed to the program.
    args: Vec<String>,
}

impl Default for CommandDecoderConfig {
    fn default() -> Self {
        Self {
            program: String::from("zbarimg"),
            args: vec![String::from("--xml"), String::from("-q"), String::from("-")],
        }
    }
}

impl CommandDecoderConfig {
    /// Decoder running `program` with `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Create a decoder config from a file.
    ///
    /// * `filepath`: path to the yaml config.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, ConfigError> {
        read_config(filepath)
    }
}

/// Pattern decoder delegating to an external program.
pub struct CommandDecoder {
    config: CommandDecoderConfig,
}

impl CommandDecoder {
    /// Create the decoder by consuming a config.
    pub fn new(config: CommandDecoderConfig) -> Self {
        Self { config }
    }

    /// Create the decoder from a config file.
    ///
    /// * `filepath`: path to the yaml config.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, DeviceError> {
        Ok(Self::new(CommandDecoderConfig::from_file(filepath)?))
    }
}

impl PatternDecoder for CommandDecoder {
    fn decode(&self, frame: &[u8]) -> Result<Vec<DecodedRegion>, DecodeError> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DecodeError::Decoder(format!("{}: {e}", self.config.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A decoder that exits early closes the pipe; its exit status decides.
            if let Err(e) = stdin.write_all(frame) {
                debug!("Decoder stopped reading the frame early {e}");
            }
        }
        let output = child
            .wait_with_output()
            .map_err(|e| DecodeError::Decoder(e.to_string()))?;

        match output.status.code() {
            Some(0) => {}
            Some(NOTHING_FOUND) => {
                debug!("Decoder found nothing");
                return Ok(Vec::new());
            }
            _ => {
                return Err(DecodeError::Decoder(format!(
                    "{} failed with {}: {}",
                    self.config.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )))
            }
        }

        let regions = parse_report(&String::from_utf8_lossy(&output.stdout))?;
        debug!(found = regions.len(), "Decoder finished");
        Ok(regions)
    }
}

fn malformed(what: &str) -> DecodeError {
    DecodeError::Decoder(format!("malformed decoder report: {what}"))
}

/// Every `<symbol>` of a zbar xml report, in document order.
fn parse_report(report: &str) -> Result<Vec<DecodedRegion>, DecodeError> {
    let mut regions = Vec::new();
    let mut rest = report;
    while let Some(start) = rest.find("<symbol") {
        rest = &rest[start..];
        let data_start = rest.find("<data").ok_or_else(|| malformed("symbol without data"))?;
        let points = attribute(&rest[..data_start], "points")
            .map(parse_points)
            .unwrap_or_default();
        let (text, remaining) = read_data(&rest[data_start..])?;
        regions.push(DecodedRegion { text, points });
        rest = remaining;
    }
    Ok(regions)
}

/// Value of `name='..'` or `name=".."` within a fragment.
fn attribute<'a>(fragment: &'a str, name: &str) -> Option<&'a str> {
    ['\'', '"'].into_iter().find_map(|quote| {
        let key = format!("{name}={quote}");
        let start = fragment.find(&key)? + key.len();
        let len = fragment[start..].find(quote)?;
        Some(&fragment[start..start + len])
    })
}

/// Polygon corners, `+x,+y` pairs separated by spaces.
fn parse_points(raw: &str) -> Vec<(i32, i32)> {
    raw.split_whitespace()
        .filter_map(|pair| {
            let (x, y) = pair.split_once(',')?;
            Some((x.parse().ok()?, y.parse().ok()?))
        })
        .collect()
}

/// Read one `<data>` element, starting at its tag. Returns the decoded text
/// and whatever follows the closing tag.
fn read_data(element: &str) -> Result<(String, &str), DecodeError> {
    let tag_end = element.find('>').ok_or_else(|| malformed("unterminated data tag"))?;
    let tag = &element[..tag_end];
    let mut body = &element[tag_end + 1..];

    // "]]>" inside the payload is written as two adjacent sections.
    let mut raw = String::new();
    if body.starts_with("<![CDATA[") {
        while let Some(section) = body.strip_prefix("<![CDATA[") {
            let end = section.find("]]>").ok_or_else(|| malformed("unterminated CDATA"))?;
            raw.push_str(&section[..end]);
            body = &section[end + 3..];
        }
    } else {
        let end = body.find('<').ok_or_else(|| malformed("unterminated data"))?;
        raw.push_str(&unescape(&body[..end]));
        body = &body[end..];
    }
    let rest = body
        .strip_prefix("</data>")
        .ok_or_else(|| malformed("missing closing data tag"))?;

    let text = match attribute(tag, "format") {
        Some("base64") => {
            let compact: String = raw.split_whitespace().collect();
            let bytes = STANDARD
                .decode(compact)
                .map_err(|e| malformed(&format!("base64 data: {e}")))?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
        _ => raw,
    };
    Ok((text, rest))
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_file_path;

    const REPORT: &str = "<barcodes xmlns='http://zbar.sourceforge.net/2008/barcode'>
<source href='-'>
<index num='0'>
<symbol type='QR-Code' quality='1' orientation='UP'><polygon points='+12,10 +12,90 +92,90 +92,10'/><data><![CDATA[first
line]]></data></symbol>
<symbol type='QR-Code' quality='1' orientation='UP'><polygon points='+120,8 +118,60 +170,62 +172,10'/><data format='base64' length='5'>U09TIQ==</data></symbol>
</index>
</source>
</barcodes>
";

    fn shell_decoder(script: &str) -> CommandDecoder {
        CommandDecoder::new(CommandDecoderConfig::new(
            "sh",
            vec![String::from("-c"), script.to_string()],
        ))
    }

    #[test]
    fn test_report_symbols_in_order() {
        let regions = parse_report(REPORT).expect("Failed to parse report");
        assert_eq!(
            regions,
            vec![
                DecodedRegion {
                    text: String::from("first\nline"),
                    points: vec![(12, 10), (12, 90), (92, 90), (92, 10)],
                },
                DecodedRegion {
                    text: String::from("SOS!"),
                    points: vec![(120, 8), (118, 60), (170, 62), (172, 10)],
                },
            ]
        );
    }

    #[test]
    fn test_split_cdata_and_escaped_data() {
        let report = "<symbol><data><![CDATA[a]]]]><![CDATA[>b]]></data></symbol>\
                      <symbol><data>x &amp; y</data></symbol>";
        let texts: Vec<String> = parse_report(report)
            .unwrap()
            .into_iter()
            .map(|region| region.text)
            .collect();
        assert_eq!(texts, vec!["a]]>b", "x & y"]);
    }

    #[test]
    fn test_truncated_report_is_decoder_failure() {
        assert!(matches!(
            parse_report("<symbol type='QR-Code'><data><![CDATA[cut"),
            Err(DecodeError::Decoder(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_multiline_symbol_stays_one_region() {
        let decoder = shell_decoder(
            "cat > /dev/null; printf '<symbol><polygon points=\"+1,2 +3,4\"/><data><![CDATA[one\\ntwo]]></data></symbol>'",
        );
        let regions = decoder.decode(b"frame").expect("Decoder failed");
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].text, "one\ntwo");
        assert_eq!(regions[0].points, vec![(1, 2), (3, 4)]);
    }

    #[cfg(unix)]
    #[test]
    fn test_nothing_found_is_empty() {
        let decoder = shell_decoder("cat > /dev/null; exit 4");
        assert!(decoder.decode(b"frame").unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_run_is_decoder_failure() {
        let decoder = shell_decoder("cat > /dev/null; echo 'unreadable image' >&2; exit 1");
        assert!(matches!(
            decoder.decode(b"frame"),
            Err(DecodeError::Decoder(message)) if message.contains("unreadable image")
        ));
    }

    #[test]
    fn test_missing_program_is_decoder_failure() {
        let decoder = CommandDecoder::new(CommandDecoderConfig::new(
            "morselink-no-such-decoder",
            Vec::new(),
        ));
        assert!(matches!(
            decoder.decode(b"frame"),
            Err(DecodeError::Decoder(_))
        ));
    }

    #[test]
    fn test_read_decoder_config_file() {
        let file = test_file_path!("/config/devices/station/decoder.yaml");
        let config = CommandDecoderConfig::from_file(file).expect("Failed to read config");
        assert_eq!(config, CommandDecoderConfig::default());
    }
}
