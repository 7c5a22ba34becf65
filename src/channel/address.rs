use serde::Serialize;
use std::fmt;

/// Canonical recipient identifier required by the messaging transport.
///
/// Only produced by [`normalize`], so every value already carries the
/// channel suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ChannelAddress(String);

impl ChannelAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Portion before the channel suffix (the bare number)
    pub fn local_part<'a>(&'a self, suffix: &str) -> &'a str {
        self.0.strip_suffix(suffix).unwrap_or(&self.0)
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes a raw recipient string into its canonical channel form.
///
/// - Whitespace, parentheses and dashes are removed
/// - Leading `+` signs are removed
/// - `suffix` is appended unless the result already ends with it
///
/// Idempotent for any suffix free of the stripped characters (enforced by
/// config validation).
pub fn normalize(raw: &str, suffix: &str) -> ChannelAddress {
    let stripped: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '(' | ')' | '-'))
        .collect();
    let stripped = stripped.trim_start_matches('+');

    if stripped.ends_with(suffix) {
        ChannelAddress(stripped.to_string())
    } else {
        ChannelAddress(format!("{}{}", stripped, suffix))
    }
}
