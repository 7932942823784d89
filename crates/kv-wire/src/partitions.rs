//! `replicas` info-response payload: per namespace, a regime and one
//! ownership bitmap per replica row, as reported by a single node.
//!
//! Combining the bitmaps reported by every node into the cluster-wide
//! partition matrix is `kv-cluster`'s job; this module only turns the wire
//! text into typed per-node data.

use base64::Engine;

use crate::error::WireError;
use kv_core::partition::PARTITION_COUNT;

/// `ceil(4096/8)` bytes per bitmap.
pub const BITMAP_BYTES: usize = (PARTITION_COUNT as usize).div_ceil(8);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceReplicas {
    pub regime: u32,
    /// One bitmap per replica row; `bitmaps[r]` has bit `i` set iff this
    /// node owns partition `i` at replica index `r`.
    pub bitmaps: Vec<Vec<u8>>,
}

impl NamespaceReplicas {
    /// Whether this node owns `partition_id` at replica row `row`.
    pub fn owns(&self, row: usize, partition_id: u16) -> bool {
        let Some(bitmap) = self.bitmaps.get(row) else { return false };
        let byte = partition_id as usize / 8;
        let bit = 7 - (partition_id as usize % 8);
        bitmap.get(byte).map(|b| (b >> bit) & 1 == 1).unwrap_or(false)
    }
}

/// Parse the full `replicas` payload into a map of namespace → per-row
/// bitmaps. Payload shape: `<ns>:<regime>,<replicaCount>,<b64>,<b64>,…;…`.
pub fn parse_replicas(payload: &str) -> Result<Vec<(String, NamespaceReplicas)>, WireError> {
    let mut out = Vec::new();
    for entry in payload.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (ns, rest) = entry
            .split_once(':')
            .ok_or_else(|| WireError::MalformedPartitions(format!("missing ':' in {entry:?}")))?;
        let mut fields = rest.split(',');
        let regime: u32 = fields
            .next()
            .ok_or_else(|| WireError::MalformedPartitions("missing regime".into()))?
            .parse()
            .map_err(|_| WireError::MalformedPartitions("regime not a number".into()))?;
        let replica_count: usize = fields
            .next()
            .ok_or_else(|| WireError::MalformedPartitions("missing replica count".into()))?
            .parse()
            .map_err(|_| WireError::MalformedPartitions("replica count not a number".into()))?;

        let mut bitmaps = Vec::with_capacity(replica_count);
        for _ in 0..replica_count {
            let b64 = fields
                .next()
                .ok_or_else(|| WireError::MalformedPartitions("missing bitmap column".into()))?;
            let bytes = base64::engine::general_purpose::STANDARD.decode(b64)?;
            if bytes.len() != BITMAP_BYTES {
                return Err(WireError::BitmapLength { expected: BITMAP_BYTES, got: bytes.len() });
            }
            bitmaps.push(bytes);
        }
        out.push((ns.to_string(), NamespaceReplicas { regime, bitmaps }));
    }
    Ok(out)
}

/// Build a bitmap with the given partitions set, for use in tests and the
/// encode side of the round-trip property.
pub fn encode_bitmap(owned: &[u16]) -> Vec<u8> {
    let mut bytes = vec![0u8; BITMAP_BYTES];
    for &p in owned {
        let byte = p as usize / 8;
        let bit = 7 - (p as usize % 8);
        bytes[byte] |= 1 << bit;
    }
    bytes
}

pub fn encode_replicas_payload(namespace: &str, regime: u32, bitmaps: &[Vec<u8>]) -> String {
    let mut out = format!("{namespace}:{regime},{}", bitmaps.len());
    for bitmap in bitmaps {
        out.push(',');
        out.push_str(&base64::engine::general_purpose::STANDARD.encode(bitmap));
    }
    out.push(';');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_owns_exactly_chosen_partitions() {
        let owned = vec![0u16, 10, 4095];
        let bitmap = encode_bitmap(&owned);
        let payload = encode_replicas_payload("ns1", 3, &[bitmap]);
        let parsed = parse_replicas(&payload).unwrap();
        assert_eq!(parsed.len(), 1);
        let (ns, replicas) = &parsed[0];
        assert_eq!(ns, "ns1");
        assert_eq!(replicas.regime, 3);
        for p in 0..PARTITION_COUNT {
            assert_eq!(replicas.owns(0, p), owned.contains(&p), "partition {p}");
        }
    }

    #[test]
    fn parses_multiple_namespaces() {
        let b1 = encode_bitmap(&[1]);
        let b2 = encode_bitmap(&[2]);
        let payload = format!(
            "{}{}",
            encode_replicas_payload("ns1", 1, &[b1.clone()]),
            encode_replicas_payload("ns2", 2, &[b2.clone()])
        );
        let parsed = parse_replicas(&payload).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].0, "ns1");
        assert_eq!(parsed[1].0, "ns2");
    }

    #[test]
    fn rejects_wrong_bitmap_length() {
        let short_b64 = base64::engine::general_purpose::STANDARD.encode([0u8; 4]);
        let payload = format!("ns1:1,1,{short_b64};");
        assert!(matches!(parse_replicas(&payload), Err(WireError::BitmapLength { .. })));
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(parse_replicas("ns1-no-colon;").is_err());
    }

    #[test]
    fn owns_false_for_unknown_row() {
        let replicas = NamespaceReplicas { regime: 1, bitmaps: vec![encode_bitmap(&[0])] };
        assert!(!replicas.owns(1, 0));
    }
}
