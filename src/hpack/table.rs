//! RFC 7541 §2.3 header table: a 61-entry static table plus a per-connection
//! dynamic table. Combined indexing (`1..=61` static, `62..` dynamic) and the
//! `name.len + value.len + 32` byte-cost formula are implemented here; the
//! macro-built static table is carried over from the teacher's stub
//! (`hpack.rs`), generalized into a real FIFO-evicting dynamic table.

use bytes::Bytes;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct TableEntry {
    pub name: Bytes,
    pub value: Bytes,
}

impl TableEntry {
    /// RFC 7541 §4.1: "the size of an entry is the sum of its name's length
    /// in octets, its value's length in octets, and 32".
    fn cost(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }
}

macro_rules! static_table {
    ( $( $name:expr => $value:expr ),+ $(,)? ) => {
        [ $( TableEntry { name: Bytes::from_static($name), value: Bytes::from_static($value) } ),+ ]
    };
}

/// RFC 7541 Appendix A.
pub static STATIC_TABLE: [TableEntry; 61] = static_table![
    b":authority" => b"",
    b":method" => b"GET",
    b":method" => b"POST",
    b":path" => b"/",
    b":path" => b"/index.html",
    b":scheme" => b"http",
    b":scheme" => b"https",
    b":status" => b"200",
    b":status" => b"204",
    b":status" => b"206",
    b":status" => b"304",
    b":status" => b"400",
    b":status" => b"404",
    b":status" => b"500",
    b"accept-charset" => b"",
    b"accept-encoding" => b"gzip, deflate",
    b"accept-language" => b"",
    b"accept-ranges" => b"",
    b"accept" => b"",
    b"access-control-allow-origin" => b"",
    b"age" => b"",
    b"allow" => b"",
    b"authorization" => b"",
    b"cache-control" => b"",
    b"content-disposition" => b"",
    b"content-encoding" => b"",
    b"content-language" => b"",
    b"content-length" => b"",
    b"content-location" => b"",
    b"content-range" => b"",
    b"content-type" => b"",
    b"cookie" => b"",
    b"date" => b"",
    b"etag" => b"",
    b"expect" => b"",
    b"expires" => b"",
    b"from" => b"",
    b"host" => b"",
    b"if-match" => b"",
    b"if-modified-since" => b"",
    b"if-none-match" => b"",
    b"if-range" => b"",
    b"if-unmodified-since" => b"",
    b"last-modified" => b"",
    b"link" => b"",
    b"location" => b"",
    b"max-forwards" => b"",
    b"proxy-authenticate" => b"",
    b"proxy-authorization" => b"",
    b"range" => b"",
    b"referer" => b"",
    b"refresh" => b"",
    b"retry-after" => b"",
    b"server" => b"",
    b"set-cookie" => b"",
    b"strict-transport-security" => b"",
    b"transfer-encoding" => b"",
    b"user-agent" => b"",
    b"vary" => b"",
    b"via" => b"",
    b"www-authenticate" => b"",
];

/// Safety bound named in spec §3 ("Invariants"): even a maximal-sized table
/// full of empty-ish header pairs can't exceed this many entries.
pub const MAX_DYNAMIC_TABLE_ENTRIES: usize = 64 * 1024;

/// A per-connection dynamic table, FIFO with the oldest entry at the
/// highest index (RFC 7541 §2.3.2). Eviction happens from the tail; an
/// insertion too large to fit even in an empty table is dropped entirely
/// rather than stored truncated.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    max_size: usize,
    size: usize,
    entries: VecDeque<TableEntry>,
}

impl DynamicTable {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            size: 0,
            entries: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Index `1` is the most recently inserted entry, matching RFC 7541's
    /// dynamic-table-relative indexing (caller adds `STATIC_TABLE.len()`).
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TableEntry> {
        self.entries.get(index.checked_sub(1)?)
    }

    pub fn insert(&mut self, name: Bytes, value: Bytes) {
        let entry = TableEntry { name, value };
        let cost = entry.cost();
        // RFC 7541 §4.4: an entry larger than the whole table is not
        // stored, and the table becomes empty (but not an error).
        if cost > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.entries.push_front(entry);
        self.size += cost;
        self.evict_to_fit();
    }

    /// Applies a dynamic-table-size-update representation (RFC 7541 §6.3).
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to_fit();
    }

    fn evict_to_fit(&mut self) {
        while self.size > self.max_size || self.entries.len() > MAX_DYNAMIC_TABLE_ENTRIES {
            match self.entries.pop_back() {
                Some(popped) => self.size -= popped.cost(),
                None => break,
            }
        }
    }
}

/// Resolves a combined HPACK index (1-based) against the static table and a
/// dynamic table. Index 0 is always invalid (spec §4.2).
pub fn resolve<'a>(index: usize, dynamic: &'a DynamicTable) -> Option<(&'a [u8], &'a [u8])> {
    if index == 0 {
        return None;
    }
    if index <= STATIC_TABLE.len() {
        let e = &STATIC_TABLE[index - 1];
        return Some((&e.name, &e.value));
    }
    let dyn_index = index - STATIC_TABLE.len();
    dynamic.get(dyn_index).map(|e| (e.name.as_ref(), e.value.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_first_and_last() {
        assert_eq!(STATIC_TABLE[0].name.as_ref(), b":authority");
        assert_eq!(STATIC_TABLE[60].name.as_ref(), b"www-authenticate");
    }

    #[test]
    fn dynamic_table_evicts_oldest_on_overflow() {
        let mut table = DynamicTable::new(64);
        table.insert(Bytes::from_static(b"name-a"), Bytes::from_static(b"value-a")); // cost 45
        table.insert(Bytes::from_static(b"name-b"), Bytes::from_static(b"value-b")); // cost 45, evicts a
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(1).unwrap().name.as_ref(), b"name-b");
    }

    #[test]
    fn oversized_insert_is_dropped_not_stored() {
        let mut table = DynamicTable::new(10);
        table.insert(Bytes::from_static(b"this-name-is-too-long"), Bytes::from_static(b"value"));
        assert_eq!(table.len(), 0);
        assert_eq!(table.size_bytes(), 0);
    }

    #[test]
    fn shrinking_max_size_evicts() {
        let mut table = DynamicTable::new(4096);
        table.insert(Bytes::from_static(b"a"), Bytes::from_static(b"b"));
        table.insert(Bytes::from_static(b"c"), Bytes::from_static(b"d"));
        table.set_max_size(34); // fits exactly one 34-byte entry
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn combined_indexing_reaches_dynamic_entries() {
        let mut table = DynamicTable::new(4096);
        table.insert(Bytes::from_static(b"x-custom"), Bytes::from_static(b"v"));
        let (name, value) = resolve(STATIC_TABLE.len() + 1, &table).unwrap();
        assert_eq!(name, b"x-custom");
        assert_eq!(value, b"v");
    }

    #[test]
    fn index_zero_is_invalid() {
        let table = DynamicTable::new(4096);
        assert!(resolve(0, &table).is_none());
    }
}
