//! Info protocol: a one-shot text request/response exchanged over a plain
//! socket, used for tend-loop refresh (`node`, `features`, `peers-*`,
//! `partition-generation`, `replicas`, `racks:`).

use std::collections::HashMap;

use crate::error::WireError;

/// Build an info request body: names joined and terminated by `\n`.
///
/// An empty `names` list requests every known name from the server; callers
/// that want that behavior pass an empty slice.
pub fn build_request(names: &[&str]) -> Vec<u8> {
    let mut body = String::new();
    for name in names {
        body.push_str(name);
        body.push('\n');
    }
    body.into_bytes()
}

/// Parse a `name\t<value>\n` response into a name → value map.
///
/// A name with no trailing tab (bare `name\n`) maps to an empty value; the
/// server uses this to signal "name not known" without a distinct error.
pub fn parse_response(body: &[u8]) -> Result<HashMap<String, String>, WireError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| WireError::MalformedInfo(format!("not valid utf-8: {e}")))?;
    let mut out = HashMap::new();
    for line in text.split('\n') {
        if line.is_empty() {
            continue;
        }
        match line.split_once('\t') {
            Some((name, value)) => {
                out.insert(name.to_string(), value.to_string());
            }
            None => {
                out.insert(line.to_string(), String::new());
            }
        }
    }
    Ok(out)
}

/// Split a semicolon-separated `features` value into individual capability
/// names.
pub fn parse_features(value: &str) -> Vec<String> {
    value.split(';').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect()
}
