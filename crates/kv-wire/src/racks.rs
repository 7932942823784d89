//! `racks:` info-response payload: the per-namespace rack id this node
//! belongs to, used by the `PreferRack` replica policy.
//!
//! Payload shape: `<ns>:<rack-id>;<ns>:<rack-id>;…`.

use crate::error::WireError;

pub fn parse_racks(payload: &str) -> Result<Vec<(String, i32)>, WireError> {
    let mut out = Vec::new();
    for entry in payload.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (ns, rack) = entry
            .split_once(':')
            .ok_or_else(|| WireError::MalformedRacks(format!("missing ':' in {entry:?}")))?;
        let rack_id: i32 = rack
            .parse()
            .map_err(|_| WireError::MalformedRacks(format!("rack id not a number in {entry:?}")))?;
        out.push((ns.to_string(), rack_id));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_namespaces() {
        let parsed = parse_racks("ns1:0;ns2:3;").unwrap();
        assert_eq!(parsed, vec![("ns1".to_string(), 0), ("ns2".to_string(), 3)]);
    }

    #[test]
    fn ignores_trailing_empty_segments() {
        let parsed = parse_racks("ns1:2;").unwrap();
        assert_eq!(parsed, vec![("ns1".to_string(), 2)]);
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(parse_racks("ns1-no-colon;").is_err());
    }

    #[test]
    fn rejects_non_numeric_rack_id() {
        assert!(parse_racks("ns1:abc;").is_err());
    }

    #[test]
    fn empty_payload_yields_no_entries() {
        assert!(parse_racks("").unwrap().is_empty());
    }
}
