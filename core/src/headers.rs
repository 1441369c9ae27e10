//! HPACK-like header compression shared by both directions of a connection.
//!
//! Indices are 1-based: the static table occupies `1..=82`, the dynamic table follows it,
//! newest entry first. Every connection owns one [HeaderTable] for what it reads.

use rmpv::Value;
use std::collections::VecDeque;
use std::fmt;

/// Default max size of the dynamic table, in bytes as computed by [entry_size]
pub const DEFAULT_TABLE_SIZE: usize = 4096;

pub const TRACE_ID_INDEX: u64 = 80;
pub const SPAN_ID_INDEX: u64 = 81;
pub const PARENT_ID_INDEX: u64 = 82;

const ZERO_ID: &[u8] = &[0u8; 8];

static STATIC_TABLE: [(&str, &[u8]); 82] = [
    (":authority", b""),
    (":method", b"GET"),
    (":method", b"POST"),
    (":path", b"/"),
    (":path", b"/index.html"),
    (":scheme", b"http"),
    (":scheme", b"https"),
    (":status", b"200"),
    (":status", b"204"),
    (":status", b"206"),
    (":status", b"304"),
    (":status", b"400"),
    (":status", b"404"),
    (":status", b"500"),
    ("accept-charset", b""),
    ("accept-encoding", b"gzip, deflate"),
    ("accept-language", b""),
    ("accept-ranges", b""),
    ("accept", b""),
    ("access-control-allow-origin", b""),
    ("age", b""),
    ("allow", b""),
    ("authorization", b""),
    ("cache-control", b""),
    ("content-disposition", b""),
    ("content-encoding", b""),
    ("content-language", b""),
    ("content-length", b""),
    ("content-location", b""),
    ("content-range", b""),
    ("content-type", b""),
    ("cookie", b""),
    ("date", b""),
    ("etag", b""),
    ("expect", b""),
    ("expires", b""),
    ("from", b""),
    ("host", b""),
    ("if-match", b""),
    ("if-modified-since", b""),
    ("if-none-match", b""),
    ("if-range", b""),
    ("if-unmodified-since", b""),
    ("last-modified", b""),
    ("link", b""),
    ("location", b""),
    ("max-forwards", b""),
    ("proxy-authenticate", b""),
    ("proxy-authorization", b""),
    ("range", b""),
    ("referer", b""),
    ("refresh", b""),
    ("retry-after", b""),
    ("server", b""),
    ("set-cookie", b""),
    ("strict-transport-security", b""),
    ("transfer-encoding", b""),
    ("user-agent", b""),
    ("vary", b""),
    ("via", b""),
    ("www-authenticate", b""),
    // 62..=79 are reserved
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("", b""),
    ("trace_id", ZERO_ID),
    ("span_id", ZERO_ID),
    ("parent_id", ZERO_ID),
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("invalid header table index {0}")]
    InvalidIndex(u64),
    #[error("malformed header {0}")]
    Malformed(String),
}

/// RFC 7541 4.1: the 32 extra bytes approximate the per-entry overhead
#[inline]
pub fn entry_size(name: &[u8], value: &[u8]) -> usize {
    32 + name.len() + value.len()
}

pub enum SearchResult {
    /// Both name and value are in the table
    Full(u64),
    /// Only the name is
    Name(u64),
}

pub struct HeaderTable {
    max_size: usize,
    current_size: usize,
    dynamic: VecDeque<(Vec<u8>, Vec<u8>)>,
}

impl Default for HeaderTable {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE_SIZE)
    }
}

impl HeaderTable {
    pub fn new(max_size: usize) -> Self {
        Self { max_size, current_size: 0, dynamic: VecDeque::new() }
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Current size of the dynamic entries
    #[inline]
    pub fn size(&self) -> usize {
        self.current_size
    }

    #[inline]
    pub fn dynamic_len(&self) -> usize {
        self.dynamic.len()
    }

    pub fn get_by_index(&self, index: u64) -> Result<(Vec<u8>, Vec<u8>), HeaderError> {
        if index == 0 {
            return Err(HeaderError::InvalidIndex(index));
        }
        let i = (index - 1) as usize;
        if let Some((name, value)) = STATIC_TABLE.get(i) {
            return Ok((name.as_bytes().to_vec(), value.to_vec()));
        }
        match self.dynamic.get(i - STATIC_TABLE.len()) {
            Some(entry) => Ok(entry.clone()),
            None => Err(HeaderError::InvalidIndex(index)),
        }
    }

    /// Insert at the head of the dynamic table. An entry bigger than the whole table
    /// empties it instead.
    pub fn add(&mut self, name: Vec<u8>, value: Vec<u8>) {
        let size = entry_size(&name, &value);
        if size > self.max_size {
            self.dynamic.clear();
            self.current_size = 0;
        } else if self.max_size > 0 {
            self.dynamic.push_front((name, value));
            self.current_size += size;
            self.shrink();
        }
    }

    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        if max_size == 0 {
            self.dynamic.clear();
            self.current_size = 0;
        } else {
            self.shrink();
        }
    }

    fn shrink(&mut self) {
        while self.current_size > self.max_size {
            match self.dynamic.pop_back() {
                Some((name, value)) => self.current_size -= entry_size(&name, &value),
                None => break,
            }
        }
    }

    /// A full match anywhere wins over a name match, the lowest index wins among equals
    pub fn search(&self, name: &[u8], value: &[u8]) -> Option<SearchResult> {
        let mut partial = None;
        for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
            if n.is_empty() || n.as_bytes() != name {
                continue;
            }
            if *v == value {
                return Some(SearchResult::Full(i as u64 + 1));
            }
            if partial.is_none() {
                partial = Some(SearchResult::Name(i as u64 + 1));
            }
        }
        let offset = STATIC_TABLE.len() as u64;
        for (i, (n, v)) in self.dynamic.iter().enumerate() {
            if n.as_slice() != name {
                continue;
            }
            let index = offset + i as u64 + 1;
            if v.as_slice() == value {
                return Some(SearchResult::Full(index));
            }
            if partial.is_none() {
                partial = Some(SearchResult::Name(index));
            }
        }
        partial
    }

    /// Expand the raw header list of a frame, storing the entries flagged for indexing.
    ///
    /// Each raw entry is either a table index or `[store, name | index, value]`.
    pub fn merge(&mut self, raw: &[Value]) -> Result<Headers, HeaderError> {
        let mut headers = Headers::new();
        for rh in raw.iter() {
            match rh {
                Value::Integer(i) => {
                    let index = i.as_u64().ok_or_else(|| HeaderError::Malformed(rh.to_string()))?;
                    let (name, value) = self.get_by_index(index)?;
                    headers.add(name, value);
                }
                Value::Array(fields) if fields.len() == 3 => {
                    let store = fields[0].as_bool().unwrap_or(false);
                    let name = match &fields[1] {
                        Value::Integer(i) => {
                            let index =
                                i.as_u64().ok_or_else(|| HeaderError::Malformed(rh.to_string()))?;
                            self.get_by_index(index)?.0
                        }
                        other => bytes_of(other).ok_or_else(|| HeaderError::Malformed(rh.to_string()))?,
                    };
                    let value =
                        bytes_of(&fields[2]).ok_or_else(|| HeaderError::Malformed(rh.to_string()))?;
                    if store {
                        self.add(name.clone(), value.clone());
                    }
                    headers.add(name, value);
                }
                _ => return Err(HeaderError::Malformed(rh.to_string())),
            }
        }
        Ok(headers)
    }
}

#[inline]
fn bytes_of(v: &Value) -> Option<Vec<u8>> {
    match v {
        Value::String(s) => Some(s.as_bytes().to_vec()),
        Value::Binary(b) => Some(b.clone()),
        _ => None,
    }
}

/// Encode one header without touching any table, by static index when possible
pub fn pack_header(name: &[u8], value: &[u8]) -> Value {
    let mut name_ref = Value::Binary(name.to_vec());
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if n.is_empty() || n.as_bytes() != name {
            continue;
        }
        if *v == value {
            return Value::from(i as u64 + 1);
        }
        name_ref = Value::from(i as u64 + 1);
        break;
    }
    Value::Array(vec![Value::Boolean(false), name_ref, Value::Binary(value.to_vec())])
}

/// Decoded headers of one frame. Keeps insertion order, a name may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Headers {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn add(&mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.entries.push((name.into(), value.into()));
    }

    /// The last value added under the name
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.iter().rev().find(|(n, _)| n.as_slice() == name.as_bytes()).map(|(_, v)| v.as_slice())
    }

    pub fn get_list(&self, name: &str) -> Vec<&[u8]> {
        self.entries
            .iter()
            .filter(|(n, _)| n.as_slice() == name.as_bytes())
            .map(|(_, v)| v.as_slice())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.entries.iter().map(|(n, v)| (n.as_slice(), v.as_slice()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Present only when all three ids are there with 8-byte values
    pub fn trace(&self) -> Option<Trace> {
        let id = |name: &str| -> Option<u64> {
            let raw: [u8; 8] = self.get(name)?.try_into().ok()?;
            Some(u64::from_le_bytes(raw))
        };
        Some(Trace { trace_id: id("trace_id")?, span_id: id("span_id")?, parent_id: id("parent_id")? })
    }

    /// Raw wire form, never asks the peer to index anything
    pub fn pack(&self) -> Vec<Value> {
        self.entries.iter().map(|(n, v)| pack_header(n, v)).collect()
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (name, value) in self.entries.iter() {
            writeln!(f, "{}: {}", String::from_utf8_lossy(name), String::from_utf8_lossy(value))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Trace {
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_id: u64,
}

impl Trace {
    /// `[false, 80, id]`, `[false, 81, id]`, `[false, 82, id]`
    pub fn pack(&self) -> Vec<Value> {
        let entry = |index: u64, id: u64| {
            Value::Array(vec![
                Value::Boolean(false),
                Value::from(index),
                Value::Binary(id.to_le_bytes().to_vec()),
            ])
        };
        vec![
            entry(TRACE_ID_INDEX, self.trace_id),
            entry(SPAN_ID_INDEX, self.span_id),
            entry(PARENT_ID_INDEX, self.parent_id),
        ]
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}/{:016x}/{:016x}", self.trace_id, self.span_id, self.parent_id)
    }
}
