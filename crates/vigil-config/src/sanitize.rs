use std::sync::OnceLock;

use regex::Regex;

/// Redact user-provided scalars from serde/TOML diagnostics.
///
/// `serde` error strings embed the offending value (`invalid type: string
/// "secret", expected u16`, ``unknown field `secret` ``). Those messages end up
/// in logs and in protocol `error` replies, so quoted substrings and the first
/// user-controlled backticked segment are replaced with `<redacted>`.
pub fn sanitize_error_message(message: &str) -> String {
    static DOUBLE_QUOTED: OnceLock<Regex> = OnceLock::new();
    static SINGLE_QUOTED: OnceLock<Regex> = OnceLock::new();

    // Escaped quotes (`\"`) inside the literal must not end the match early.
    let double = DOUBLE_QUOTED.get_or_init(|| {
        Regex::new(r#""(?:\\.|[^"\\])*""#).expect("double-quoted regex is valid")
    });
    let single = SINGLE_QUOTED.get_or_init(|| {
        Regex::new(r#"'(?:\\.|[^'\\])*'"#).expect("single-quoted regex is valid")
    });

    let out = double.replace_all(message, r#""<redacted>""#);
    let mut out = single.replace_all(&out, "'<redacted>'").into_owned();

    // `missing field `foo`` names a schema field and stays readable; unknown
    // keys and invalid scalars come from the input.
    let start = ["unknown field `", "unknown variant `"]
        .iter()
        .filter_map(|pattern| out.find(pattern).map(|pos| pos + pattern.len() - 1))
        .min()
        .or_else(|| {
            if out.contains("invalid type:") || out.contains("invalid value:") {
                let boundary = out.find(", expected").unwrap_or(out.len());
                out[..boundary].find('`')
            } else {
                None
            }
        });

    if let Some(start) = start {
        if let Some(end_rel) = out[start + 1..].find('`') {
            let end = start + 1 + end_rel;
            out.replace_range(start + 1..end, "<redacted>");
        }
    }

    out
}
