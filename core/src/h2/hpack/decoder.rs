//! HPACK header-block decoder (RFC 7541 §6).

use crate::h2::hpack::huffman;
use crate::h2::hpack::table::DynamicTable;
use crate::h2::H2Error;
use crate::headers::HeaderList;
use crate::util::static_table::STATIC_TABLE;

pub struct Decoder {
    table: DynamicTable,
    max_header_list_size: usize,
}

impl Decoder {
    #[must_use]
    pub fn new(dynamic_table_size: usize, max_header_list_size: usize) -> Self {
        Self { table: DynamicTable::new(dynamic_table_size), max_header_list_size }
    }

    pub fn set_dynamic_table_size(&mut self, size: usize) {
        self.table.set_max_size(size);
    }

    /// Decode a complete header block into an ordered [`HeaderList`].
    /// Returns [`H2Error::HpackDecodeError`] for any malformed encoding
    /// and `CompressionError`-worthy overflow of `max_header_list_size`.
    pub fn decode(&mut self, mut block: &[u8]) -> Result<HeaderList, H2Error> {
        let mut headers = HeaderList::new();
        let mut total = 0usize;
        while !block.is_empty() {
            let first = block[0];
            if first & 0x80 != 0 {
                let (index, rest) = decode_int(block, 7)?;
                block = rest;
                let (name, value) = self.lookup(index)?;
                total += name.len() + value.len();
                headers.push(name, value);
            } else if first & 0x40 != 0 {
                let (index, rest) = decode_int(block, 6)?;
                block = rest;
                let (name, value, rest) = self.read_literal(index, block)?;
                block = rest;
                total += name.len() + value.len();
                self.table.insert(name.clone(), value.clone());
                headers.push(name, value);
            } else if first & 0x20 != 0 {
                let (size, rest) = decode_int(block, 5)?;
                block = rest;
                self.table.set_max_size(size);
            } else {
                // Without-indexing (0000xxxx) or never-indexed (0001xxxx);
                // both decode identically, indexing is a sender-side hint.
                let (index, rest) = decode_int(block, 4)?;
                block = rest;
                let (name, value, rest) = self.read_literal(index, block)?;
                block = rest;
                total += name.len() + value.len();
                headers.push(name, value);
            }
            if total > self.max_header_list_size {
                return Err(H2Error::HeaderListTooLarge);
            }
        }
        Ok(headers)
    }

    fn lookup(&self, index: usize) -> Result<(String, String), H2Error> {
        if index == 0 {
            return Err(H2Error::HpackDecodeError("zero index".into()));
        }
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Ok((name.to_string(), value.to_string()));
        }
        self.table
            .get(index - STATIC_TABLE.len() - 1)
            .cloned()
            .ok_or_else(|| H2Error::HpackDecodeError(format!("index {index} out of range")))
    }

    fn read_literal<'a>(&self, name_index: usize, rest: &'a [u8]) -> Result<(String, String, &'a [u8]), H2Error> {
        let (name, rest) = if name_index == 0 {
            read_string(rest)?
        } else {
            let (name, _) = self.lookup(name_index)?;
            (name, rest)
        };
        let (value, rest) = read_string(rest)?;
        Ok((name, value, rest))
    }
}

/// Decode an RFC 7541 §5.1 integer with an `n`-bit prefix.
fn decode_int(data: &[u8], prefix_bits: u32) -> Result<(usize, &[u8]), H2Error> {
    if data.is_empty() {
        return Err(H2Error::HpackDecodeError("empty integer".into()));
    }
    let mask = (1u8 << prefix_bits) - 1;
    let prefix = (data[0] & mask) as usize;
    if prefix < mask as usize {
        return Ok((prefix, &data[1..]));
    }
    let mut value = prefix;
    let mut shift = 0u32;
    let mut idx = 1usize;
    loop {
        let byte = *data.get(idx).ok_or_else(|| H2Error::HpackDecodeError("truncated integer".into()))?;
        value += usize::from(byte & 0x7f) << shift;
        idx += 1;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 63 {
            return Err(H2Error::HpackDecodeError("integer overflow".into()));
        }
    }
    Ok((value, &data[idx..]))
}

/// Decode an RFC 7541 §5.2 string literal.
fn read_string(data: &[u8]) -> Result<(String, &[u8]), H2Error> {
    if data.is_empty() {
        return Err(H2Error::HpackDecodeError("empty string literal".into()));
    }
    let huffman_flag = data[0] & 0x80 != 0;
    let (len, rest) = decode_int(data, 7)?;
    if rest.len() < len {
        return Err(H2Error::HpackDecodeError("truncated string literal".into()));
    }
    let raw = &rest[..len];
    let bytes = if huffman_flag { huffman::decode(raw)? } else { raw.to_vec() };
    let s = String::from_utf8(bytes).map_err(|_| H2Error::HpackDecodeError("non-utf8 string literal".into()))?;
    Ok((s, &rest[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::h2::hpack::encoder::Encoder;

    #[test]
    fn rfc7541_c_2_1_literal_with_indexing() {
        let mut encoder = Encoder::new(4096);
        let mut headers = HeaderList::new();
        headers.push("custom-key", "custom-header");
        let block = encoder.encode(&headers);

        let mut decoder = Decoder::new(4096, 1 << 20);
        let decoded = decoder.decode(&block).unwrap();
        assert_eq!(decoded.get("custom-key"), Some("custom-header"));
    }

    #[test]
    fn static_table_indexed_field() {
        // Index 2 is `:method: GET`.
        let mut decoder = Decoder::new(4096, 1 << 20);
        let decoded = decoder.decode(&[0x82]).unwrap();
        assert_eq!(decoded.get(":method"), Some("GET"));
    }

    #[test]
    fn dynamic_table_size_update_is_applied() {
        let mut decoder = Decoder::new(4096, 1 << 20);
        decoder.decode(&[0x20]).unwrap(); // shrink to 0
        assert_eq!(decoder.table.len(), 0);
    }
}
