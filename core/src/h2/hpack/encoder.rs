//! HPACK header-block encoder (RFC 7541 §6). Emits literal-with-
//! incremental-indexing for every field and leaves strings
//! non-Huffman-encoded; decoding the peer's Huffman-encoded strings is
//! still fully supported by [`super::decoder::Decoder`].

use crate::h2::hpack::table::DynamicTable;
use crate::headers::HeaderList;
use crate::util::static_table;

pub struct Encoder {
    table: DynamicTable,
}

impl Encoder {
    #[must_use]
    pub fn new(dynamic_table_size: usize) -> Self {
        Self { table: DynamicTable::new(dynamic_table_size) }
    }

    pub fn set_dynamic_table_size(&mut self, size: usize) {
        self.table.set_max_size(size);
    }

    /// Encode every field in `headers` as a header block.
    pub fn encode(&mut self, headers: &HeaderList) -> Vec<u8> {
        let mut out = Vec::new();
        for field in headers.iter() {
            self.encode_field(&field.name, &field.value, &mut out);
        }
        out
    }

    /// RFC 7540 §8.1.2 requires field names to be lowercase on the wire
    /// regardless of how application code cased them.
    fn encode_field(&mut self, name: &str, value: &str, out: &mut Vec<u8>) {
        let name = name.to_ascii_lowercase();
        let name = name.as_str();
        if let Some((index, value_matched)) = static_table::find(name, value) {
            if value_matched {
                encode_int(out, 0x80, 7, index);
                return;
            }
            encode_int(out, 0x40, 6, index);
            encode_string(out, value);
            self.table.insert(name.to_string(), value.to_string());
            return;
        }
        encode_int(out, 0x40, 6, 0);
        encode_string(out, name);
        encode_string(out, value);
        self.table.insert(name.to_string(), value.to_string());
    }
}

/// Encode an RFC 7541 §5.1 integer with prefix bits `prefix_bits` and
/// high bits `marker` (already shifted into position).
fn encode_int(out: &mut Vec<u8>, marker: u8, prefix_bits: u32, value: usize) {
    let max_prefix = (1usize << prefix_bits) - 1;
    if value < max_prefix {
        out.push(marker | value as u8);
        return;
    }
    out.push(marker | max_prefix as u8);
    let mut value = value - max_prefix;
    while value >= 128 {
        out.push(((value % 128) | 0x80) as u8);
        value /= 128;
    }
    out.push(value as u8);
}

/// Encode a string literal without Huffman coding (the huffman flag bit
/// is left clear).
fn encode_string(out: &mut Vec<u8>, s: &str) {
    encode_int(out, 0x00, 7, s.len());
    out.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderList;

    #[test]
    fn static_table_exact_match_is_fully_indexed() {
        let mut encoder = Encoder::new(4096);
        let mut headers = HeaderList::new();
        headers.push(":method", "GET");
        let block = encoder.encode(&headers);
        assert_eq!(block, vec![0x82]);
    }

    #[test]
    fn mixed_case_field_name_is_lowercased_on_the_wire() {
        let mut encoder = Encoder::new(4096);
        let mut headers = HeaderList::new();
        headers.push("Content-Type", "text/plain");
        encoder.encode(&headers);
        assert!(encoder.table.contains_name("content-type"));
    }

    #[test]
    fn large_integer_uses_continuation_bytes() {
        let mut out = Vec::new();
        encode_int(&mut out, 0x00, 5, 1337);
        assert_eq!(out, vec![0x1f, 0x9a, 0x0a]);
    }
}
