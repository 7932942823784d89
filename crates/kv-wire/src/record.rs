//! Per-record response header for multi-record (batch, scan, query)
//! responses: 22 bytes, with `INFO3_LAST` marking the end of a record group.

use crate::error::WireError;

pub const RECORD_HEADER_LEN: usize = 22;

/// `INFO3_LAST` set means this record is the final one in its group.
pub const INFO3_LAST: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub info3: u8,
    pub result_code: u8,
    pub generation: u32,
    pub expiration: u32,
    pub batch_index: u32,
    pub field_count: u16,
    pub op_count: u16,
}

impl RecordHeader {
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < RECORD_HEADER_LEN {
            return Err(WireError::FrameTooShort { need: RECORD_HEADER_LEN, have: buf.len() });
        }
        Ok(Self {
            info3: buf[3],
            result_code: buf[5],
            generation: u32::from_be_bytes(buf[6..10].try_into().unwrap()),
            expiration: u32::from_be_bytes(buf[10..14].try_into().unwrap()),
            batch_index: u32::from_be_bytes(buf[14..18].try_into().unwrap()),
            field_count: u16::from_be_bytes(buf[18..20].try_into().unwrap()),
            op_count: u16::from_be_bytes(buf[20..22].try_into().unwrap()),
        })
    }

    pub fn is_last(&self) -> bool {
        self.info3 & INFO3_LAST != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(info3: u8, result_code: u8) -> [u8; RECORD_HEADER_LEN] {
        let mut buf = [0u8; RECORD_HEADER_LEN];
        buf[3] = info3;
        buf[5] = result_code;
        buf[6..10].copy_from_slice(&7u32.to_be_bytes());
        buf[10..14].copy_from_slice(&0u32.to_be_bytes());
        buf[14..18].copy_from_slice(&3u32.to_be_bytes());
        buf[18..20].copy_from_slice(&0u16.to_be_bytes());
        buf[20..22].copy_from_slice(&2u16.to_be_bytes());
        buf
    }

    #[test]
    fn decodes_all_fields() {
        let buf = sample_header(0, 0);
        let header = RecordHeader::decode(&buf).unwrap();
        assert_eq!(header.generation, 7);
        assert_eq!(header.batch_index, 3);
        assert_eq!(header.op_count, 2);
    }

    #[test]
    fn info3_last_bit_terminates_group() {
        let with_last = RecordHeader::decode(&sample_header(INFO3_LAST, 0)).unwrap();
        assert!(with_last.is_last());

        let without_last = RecordHeader::decode(&sample_header(0, 0)).unwrap();
        assert!(!without_last.is_last());
    }

    #[test]
    fn other_info3_bits_do_not_mask_last() {
        let header = RecordHeader::decode(&sample_header(0b0000_0011, 0)).unwrap();
        assert!(header.is_last());
    }

    #[test]
    fn rejects_short_buffer() {
        let buf = [0u8; 10];
        assert!(matches!(RecordHeader::decode(&buf), Err(WireError::FrameTooShort { .. })));
    }
}
