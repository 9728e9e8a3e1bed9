//! RFC 7541 HPACK: integer/Huffman codecs (`integer`, `huffman`), the static
//! + dynamic table (`table`), and the encoder/decoder that share table
//! discipline, wired together here.

pub mod huffman;
pub mod integer;
pub mod table;

use crate::types::HeaderList;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use table::{DynamicTable, STATIC_TABLE};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HpackError {
    /// HPACK state is desynchronized; always escalates to a connection-level
    /// COMPRESSION_ERROR per RFC 7541 and spec §7.
    #[error("HPACK decompression error: {0}")]
    Decompression(String),

    /// A header name failed RFC 7230 token / pseudo-header validation; spec
    /// §4.2 makes this a stream-scoped PROTOCOL_ERROR, not a connection
    /// error, so it is kept distinct from `Decompression`.
    #[error("invalid header name {0:?}")]
    InvalidName(String),
}

impl From<integer::IntegerDecodeError> for HpackError {
    fn from(e: integer::IntegerDecodeError) -> Self {
        HpackError::Decompression(e.to_string())
    }
}

impl From<huffman::HuffmanError> for HpackError {
    fn from(e: huffman::HuffmanError) -> Self {
        HpackError::Decompression(e.to_string())
    }
}

/// Default cap from spec §6 / §4.2; callers can lower it from
/// `SETTINGS_MAX_HEADER_LIST_SIZE`.
pub const DEFAULT_MAX_HEADER_LIST_SIZE: usize = 8192;

fn is_pseudo(name: &[u8]) -> bool {
    name.first() == Some(&b':')
}

/// RFC 7230 token charset (VCHAR minus separators), which is what HPACK
/// requires of a non-pseudo header name on the wire.
fn is_token_byte(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
    ) || b.is_ascii_alphanumeric()
}

fn validate_name(name: &[u8]) -> Result<(), HpackError> {
    if name.is_empty() {
        return Err(HpackError::InvalidName(String::from_utf8_lossy(name).into_owned()));
    }
    if is_pseudo(name) {
        if name[1..].iter().all(|&b| is_token_byte(b) || b == b':') {
            return Ok(());
        }
        return Err(HpackError::InvalidName(String::from_utf8_lossy(name).into_owned()));
    }
    if name.iter().any(|b| b.is_ascii_uppercase()) {
        return Err(HpackError::InvalidName(String::from_utf8_lossy(name).into_owned()));
    }
    if name.iter().all(|&b| is_token_byte(b)) {
        Ok(())
    } else {
        Err(HpackError::InvalidName(String::from_utf8_lossy(name).into_owned()))
    }
}

/// Picks the shorter of the raw and Huffman-coded representation, as
/// RFC 7541 §5.2 recommends (and as every production encoder does).
fn encode_string(out: &mut BytesMut, s: &[u8]) {
    let huff_len = huffman::encoded_len(s);
    if huff_len < s.len() {
        integer::encode(7, 0x80, huff_len as u64, out);
        huffman::encode(s, out);
    } else {
        integer::encode(7, 0x00, s.len() as u64, out);
        out.extend_from_slice(s);
    }
}

fn decode_string(buf: &mut Bytes) -> Result<Vec<u8>, HpackError> {
    if !buf.has_remaining() {
        return Err(HpackError::Decompression("truncated string literal".into()));
    }
    let first = buf[0];
    let huffman_flag = first & 0x80 != 0;
    let mut rest = buf.clone();
    rest.advance(1);
    let len = integer::decode(7, first, &mut rest)? as usize;
    let consumed = buf.remaining() - rest.remaining();
    buf.advance(consumed);

    if buf.remaining() < len {
        return Err(HpackError::Decompression("string literal longer than remaining block".into()));
    }
    let raw = buf.copy_to_bytes(len);
    if huffman_flag {
        Ok(huffman::decode(&raw)?)
    } else {
        Ok(raw.to_vec())
    }
}

pub struct Encoder {
    table: DynamicTable,
}

impl Encoder {
    #[must_use]
    pub fn new(max_dynamic_table_size: usize) -> Self {
        Self { table: DynamicTable::new(max_dynamic_table_size) }
    }

    #[must_use]
    pub fn dynamic_table_len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn dynamic_table_size_bytes(&self) -> usize {
        self.table.size_bytes()
    }

    /// Applies a local table-size change (our own SETTINGS changed, or we
    /// decided to shrink it); emits the size-update representation so the
    /// peer's decoder stays in sync.
    pub fn set_max_dynamic_table_size(&mut self, size: usize, out: &mut BytesMut) {
        self.table.set_max_size(size);
        integer::encode(5, 0x20, size as u64, out);
    }

    fn find_in_table(&self, name: &[u8], value: &[u8]) -> (Option<usize>, Option<usize>) {
        let mut name_idx = None;
        for (i, e) in STATIC_TABLE.iter().enumerate() {
            if e.name.as_ref() == name {
                if e.value.as_ref() == value {
                    return (Some(i + 1), Some(i + 1));
                }
                name_idx.get_or_insert(i + 1);
            }
        }
        for i in 1..=self.table.len() {
            let e = self.table.get(i).unwrap();
            if e.name.as_ref() == name {
                let idx = STATIC_TABLE.len() + i;
                if e.value.as_ref() == value {
                    return (Some(idx), Some(idx));
                }
                name_idx.get_or_insert(idx);
            }
        }
        (name_idx, None)
    }

    /// Encodes a header list into one header block. Names are lowercased on
    /// the wire (spec §4.2) except pseudo-headers, which are kept as-is.
    pub fn encode<'a>(&mut self, headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Bytes {
        let mut out = BytesMut::new();
        for (name, value) in headers {
            let lowered_owned;
            let name: &[u8] = if is_pseudo(name.as_bytes()) || name.bytes().all(|b| !b.is_ascii_uppercase()) {
                name.as_bytes()
            } else {
                lowered_owned = name.to_ascii_lowercase();
                lowered_owned.as_bytes()
            };
            let value = value.as_bytes();
            let (exact, full_match) = self.find_in_table(name, value);
            if let Some(idx) = full_match {
                integer::encode(7, 0x80, idx as u64, &mut out);
                continue;
            }
            // Literal with incremental indexing (we always index new entries).
            match exact {
                Some(idx) => integer::encode(6, 0x40, idx as u64, &mut out),
                None => {
                    out.put_u8(0x40);
                    encode_string(&mut out, name);
                }
            }
            encode_string(&mut out, value);
            self.table.insert(Bytes::copy_from_slice(name), Bytes::copy_from_slice(value));
        }
        out.freeze()
    }
}

pub struct Decoder {
    table: DynamicTable,
    max_header_list_size: usize,
    peer_table_size_limit: usize,
}

impl Decoder {
    #[must_use]
    pub fn new(max_dynamic_table_size: usize, max_header_list_size: usize) -> Self {
        Self {
            table: DynamicTable::new(max_dynamic_table_size),
            max_header_list_size,
            peer_table_size_limit: max_dynamic_table_size,
        }
    }

    #[must_use]
    pub fn dynamic_table_len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn dynamic_table_size_bytes(&self) -> usize {
        self.table.size_bytes()
    }

    pub fn set_max_header_list_size(&mut self, size: usize) {
        self.max_header_list_size = size;
    }

    /// Our local SETTINGS_HEADER_TABLE_SIZE: the ceiling a peer-sent dynamic
    /// table size update must not exceed (spec §4.2).
    pub fn set_peer_table_size_limit(&mut self, size: usize) {
        self.peer_table_size_limit = size;
        if self.table.max_size() > size {
            self.table.set_max_size(size);
        }
    }

    /// Decodes one complete header block (a HEADERS frame plus any
    /// CONTINUATION frames already concatenated by the caller).
    pub fn decode(&mut self, block: &[u8]) -> Result<HeaderList, HpackError> {
        let mut buf = Bytes::copy_from_slice(block);
        let mut out = Vec::new();
        let mut header_list_bytes = 0usize;
        let mut seen_header_representation = false;

        while buf.has_remaining() {
            let first = buf[0];
            if first & 0x80 != 0 {
                // Indexed header field.
                seen_header_representation = true;
                let mut rest = buf.clone();
                rest.advance(1);
                let index = integer::decode(7, first, &mut rest)? as usize;
                let consumed = buf.remaining() - rest.remaining();
                buf.advance(consumed);
                let (name, value) = table::resolve(index, &self.table)
                    .ok_or_else(|| HpackError::Decompression(format!("invalid HPACK index {index}")))?;
                let (name, value) = (name.to_vec(), value.to_vec());
                self.push_header(&mut out, &mut header_list_bytes, name, value)?;
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing.
                seen_header_representation = true;
                let (name, value) = self.decode_literal(&mut buf, 6)?;
                self.table.insert(Bytes::copy_from_slice(&name), Bytes::copy_from_slice(&value));
                self.push_header(&mut out, &mut header_list_bytes, name, value)?;
            } else if first & 0x20 != 0 {
                // Dynamic table size update -- only legal before any header
                // representation in this block (spec §4.2).
                if seen_header_representation {
                    return Err(HpackError::Decompression(
                        "dynamic table size update after a header representation".into(),
                    ));
                }
                let mut rest = buf.clone();
                rest.advance(1);
                let size = integer::decode(5, first, &mut rest)? as usize;
                let consumed = buf.remaining() - rest.remaining();
                buf.advance(consumed);
                if size > self.peer_table_size_limit {
                    return Err(HpackError::Decompression(
                        "dynamic table size update exceeds negotiated SETTINGS_HEADER_TABLE_SIZE".into(),
                    ));
                }
                self.table.set_max_size(size);
            } else if first & 0x10 != 0 {
                // Literal never indexed.
                seen_header_representation = true;
                let (name, value) = self.decode_literal(&mut buf, 4)?;
                self.push_header(&mut out, &mut header_list_bytes, name, value)?;
            } else {
                // Literal without indexing.
                seen_header_representation = true;
                let (name, value) = self.decode_literal(&mut buf, 4)?;
                self.push_header(&mut out, &mut header_list_bytes, name, value)?;
            }
        }

        Ok(out)
    }

    fn push_header(
        &self,
        out: &mut HeaderList,
        header_list_bytes: &mut usize,
        name: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<(), HpackError> {
        validate_name(&name)?;
        *header_list_bytes += name.len() + value.len() + 32;
        if *header_list_bytes > self.max_header_list_size {
            return Err(HpackError::Decompression(format!(
                "decompressed header list exceeds {} bytes",
                self.max_header_list_size
            )));
        }
        let name = String::from_utf8(name)
            .map_err(|e| HpackError::Decompression(format!("header name not UTF-8: {e}")))?;
        let value = String::from_utf8_lossy(&value).into_owned();
        out.push((name, value));
        Ok(())
    }

    fn decode_literal(
        &mut self,
        buf: &mut Bytes,
        prefix_bits: u8,
    ) -> Result<(Vec<u8>, Vec<u8>), HpackError> {
        let first = buf[0];
        let index_mask = (1u8 << prefix_bits) - 1;
        let index_bits = first & index_mask;
        let name = if index_bits == 0 {
            buf.advance(1);
            decode_string(buf)?
        } else {
            let mut rest = buf.clone();
            rest.advance(1);
            let index = integer::decode(prefix_bits, first, &mut rest)? as usize;
            let consumed = buf.remaining() - rest.remaining();
            buf.advance(consumed);
            let (name, _) = table::resolve(index, &self.table)
                .ok_or_else(|| HpackError::Decompression(format!("invalid HPACK index {index}")))?;
            name.to_vec()
        };
        let value = decode_string(buf)?;
        Ok((name, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_simple_request_headers() {
        let mut enc = Encoder::new(4096);
        let mut dec = Decoder::new(4096, DEFAULT_MAX_HEADER_LIST_SIZE);
        let headers = vec![(":method", "GET"), (":path", "/"), ("x-custom", "value")];
        let block = enc.encode(headers.clone());
        let decoded = dec.decode(&block).unwrap();
        let expected: HeaderList = headers.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        assert_eq!(decoded, expected);
    }

    #[test]
    fn repeated_header_reuses_dynamic_table_entry() {
        let mut enc = Encoder::new(4096);
        let mut dec = Decoder::new(4096, DEFAULT_MAX_HEADER_LIST_SIZE);
        let first = enc.encode(vec![("x-custom", "value")]);
        let second = enc.encode(vec![("x-custom", "value")]);
        assert!(second.len() < first.len());
        assert_eq!(dec.decode(&first).unwrap(), vec![("x-custom".to_string(), "value".to_string())]);
        assert_eq!(dec.decode(&second).unwrap(), vec![("x-custom".to_string(), "value".to_string())]);
        assert_eq!(enc.dynamic_table_len(), 1);
        assert_eq!(dec.dynamic_table_len(), 1);
    }

    #[test]
    fn index_zero_is_decompression_error() {
        let mut dec = Decoder::new(4096, DEFAULT_MAX_HEADER_LIST_SIZE);
        // 0x80 | 0 => indexed field, index 0.
        let err = dec.decode(&[0x80]).unwrap_err();
        assert!(matches!(err, HpackError::Decompression(_)));
    }

    #[test]
    fn uppercase_name_is_invalid_name_not_decompression() {
        let mut dec = Decoder::new(4096, DEFAULT_MAX_HEADER_LIST_SIZE);
        let mut block = BytesMut::new();
        block.put_u8(0x40); // literal with incremental indexing, new name
        encode_string(&mut block, b"User-Agent");
        encode_string(&mut block, b"abc");
        let err = dec.decode(&block).unwrap_err();
        assert!(matches!(err, HpackError::InvalidName(_)));
    }

    #[test]
    fn size_update_after_header_representation_is_rejected() {
        let mut dec = Decoder::new(4096, DEFAULT_MAX_HEADER_LIST_SIZE);
        let mut block = BytesMut::new();
        integer::encode(7, 0x80, 2, &mut block); // indexed :method GET
        integer::encode(5, 0x20, 100, &mut block); // size update, now illegal
        let err = dec.decode(&block).unwrap_err();
        assert!(matches!(err, HpackError::Decompression(_)));
    }

    #[test]
    fn size_update_above_peer_limit_is_rejected() {
        let mut dec = Decoder::new(4096, DEFAULT_MAX_HEADER_LIST_SIZE);
        dec.set_peer_table_size_limit(100);
        let mut block = BytesMut::new();
        integer::encode(5, 0x20, 200, &mut block);
        let err = dec.decode(&block).unwrap_err();
        assert!(matches!(err, HpackError::Decompression(_)));
    }

    #[test]
    fn bomb_defense_trips_on_oversized_header_list() {
        let mut enc = Encoder::new(4096);
        let mut dec = Decoder::new(4096, 64); // tiny cap
        let block = enc.encode(vec![("x-custom", &"a".repeat(200))]);
        let err = dec.decode(&block).unwrap_err();
        assert!(matches!(err, HpackError::Decompression(_)));
    }
}
