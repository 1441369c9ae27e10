use cocaine_core::CocaineError;
use rmpv::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not an array: {0}")]
    NotArray(String),
    #[error("frame has {0} fields, expected 3 or 4")]
    Arity(usize),
    #[error("invalid frame field `{0}`")]
    Field(&'static str),
    #[error("malformed msgpack: {0}")]
    Malformed(String),
    #[error("encode error: {0}")]
    Encode(String),
}

impl From<FrameError> for CocaineError {
    #[inline]
    fn from(e: FrameError) -> Self {
        CocaineError::Frame(e.to_string())
    }
}

/// One message of a session
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub session: u64,
    pub msg_type: u64,
    pub payload: Vec<Value>,
    /// Raw header entries, only meaningful with the connection's header table
    pub headers: Option<Vec<Value>>,
}

impl Frame {
    #[inline]
    pub fn new(session: u64, msg_type: u64, payload: Vec<Value>) -> Self {
        Self { session, msg_type, payload, headers: None }
    }

    /// Empty header lists are not written
    #[inline]
    pub fn with_headers(mut self, headers: Vec<Value>) -> Self {
        if !headers.is_empty() {
            self.headers = Some(headers);
        }
        self
    }

    pub fn to_value(&self) -> Value {
        let mut fields = Vec::with_capacity(4);
        fields.push(Value::from(self.session));
        fields.push(Value::from(self.msg_type));
        fields.push(Value::Array(self.payload.clone()));
        if let Some(headers) = self.headers.as_ref() {
            fields.push(Value::Array(headers.clone()));
        }
        Value::Array(fields)
    }

    #[inline]
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::with_capacity(64);
        self.encode_into(&mut buf)?;
        return Ok(buf);
    }

    /// Append the encoded frame to buf, and return the size written
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<usize, FrameError> {
        let pre_len = buf.len();
        if let Err(e) = rmpv::encode::write_value(buf, &self.to_value()) {
            return Err(FrameError::Encode(e.to_string()));
        }
        Ok(buf.len() - pre_len)
    }

    pub fn from_value(v: Value) -> Result<Self, FrameError> {
        let fields = match v {
            Value::Array(fields) => fields,
            other => return Err(FrameError::NotArray(other.to_string())),
        };
        if fields.len() != 3 && fields.len() != 4 {
            return Err(FrameError::Arity(fields.len()));
        }
        let mut fields = fields.into_iter();
        let session = fields.next().and_then(|v| v.as_u64()).ok_or(FrameError::Field("session"))?;
        let msg_type = fields.next().and_then(|v| v.as_u64()).ok_or(FrameError::Field("type"))?;
        let payload = match fields.next() {
            Some(Value::Array(payload)) => payload,
            _ => return Err(FrameError::Field("payload")),
        };
        let headers = match fields.next() {
            None | Some(Value::Nil) => None,
            Some(Value::Array(headers)) => Some(headers),
            Some(_) => return Err(FrameError::Field("headers")),
        };
        Ok(Self { session, msg_type, payload, headers })
    }
}

/// Resumable walk over the msgpack encoding of one value.
///
/// Only headers are read, bodies are jumped over, and the position survives between feeds,
/// so a value arriving in many reads is walked once.
#[derive(Default)]
struct Scanner {
    /// Offset from the start of the value
    pos: usize,
    /// Items still expected by every open array or map, innermost last
    open: Vec<u64>,
    #[cfg(test)]
    visits: usize,
}

#[inline]
fn be_len(buf: &[u8], width: usize) -> u64 {
    buf[..width].iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

enum Item {
    /// Header size and body size
    Scalar(usize, u64),
    /// Header size and number of children
    Container(usize, u64),
}

impl Scanner {
    #[inline]
    fn reset(&mut self) {
        self.pos = 0;
        self.open.clear();
    }

    /// Size of the value once all its bytes are in `buf`
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        loop {
            #[cfg(test)]
            {
                self.visits += 1;
            }
            let rest = buf.get(self.pos..)?;
            let marker = *rest.first()?;
            let item = match marker {
                0x00..=0x7f | 0xe0..=0xff | 0xc0..=0xc3 => Item::Scalar(1, 0),
                0x80..=0x8f => Item::Container(1, 2 * (marker & 0x0f) as u64),
                0x90..=0x9f => Item::Container(1, (marker & 0x0f) as u64),
                0xa0..=0xbf => Item::Scalar(1, (marker & 0x1f) as u64),
                0xca => Item::Scalar(5, 0),
                0xcb => Item::Scalar(9, 0),
                0xcc | 0xd0 => Item::Scalar(2, 0),
                0xcd | 0xd1 => Item::Scalar(3, 0),
                0xce | 0xd2 => Item::Scalar(5, 0),
                0xcf | 0xd3 => Item::Scalar(9, 0),
                0xd4 => Item::Scalar(2, 1),
                0xd5 => Item::Scalar(2, 2),
                0xd6 => Item::Scalar(2, 4),
                0xd7 => Item::Scalar(2, 8),
                0xd8 => Item::Scalar(2, 16),
                // bin, str and ext carry a length, ext has one more type byte
                0xc4 | 0xd9 | 0xc5 | 0xda | 0xc6 | 0xdb | 0xc7 | 0xc8 | 0xc9 => {
                    let width = match marker {
                        0xc4 | 0xd9 | 0xc7 => 1,
                        0xc5 | 0xda | 0xc8 => 2,
                        _ => 4,
                    };
                    let ext = matches!(marker, 0xc7..=0xc9) as usize;
                    let len = be_len(rest.get(1..1 + width)?, width);
                    Item::Scalar(1 + width + ext, len)
                }
                0xdc | 0xdd | 0xde | 0xdf => {
                    let width = if marker == 0xdc || marker == 0xde { 2 } else { 4 };
                    let n = be_len(rest.get(1..1 + width)?, width);
                    let n = if marker >= 0xde { 2 * n } else { n };
                    Item::Container(1 + width, n)
                }
            };
            let done = match item {
                Item::Scalar(header, body) => {
                    let size = header as u64 + body;
                    if (rest.len() as u64) < size {
                        return None;
                    }
                    self.pos += size as usize;
                    self.finish_item()
                }
                Item::Container(header, children) => {
                    if rest.len() < header {
                        return None;
                    }
                    self.pos += header;
                    if children == 0 {
                        self.finish_item()
                    } else {
                        self.open.push(children);
                        false
                    }
                }
            };
            if done {
                return Some(self.pos);
            }
        }
    }

    /// Returns true when the outermost value is complete
    fn finish_item(&mut self) -> bool {
        while let Some(left) = self.open.last_mut() {
            *left -= 1;
            if *left > 0 {
                return false;
            }
            self.open.pop();
        }
        true
    }
}

/// Cuts frames out of a byte stream fed in arbitrary chunks.
///
/// A frame split over several reads stays buffered until it is complete, and is decoded once.
/// A complete value that is not a valid frame is skipped as a whole and reported as an error.
#[derive(Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    pos: usize,
    scan: Scanner,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet decoded
    #[inline]
    pub fn pending(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }
}

impl Iterator for FrameDecoder {
    type Item = Result<Frame, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            self.compact();
            return None;
        }
        let Some(len) = self.scan.advance(&self.buf[self.pos..]) else {
            self.compact();
            return None;
        };
        self.scan.reset();
        let res = rmpv::decode::read_value(&mut &self.buf[self.pos..self.pos + len]);
        self.pos += len;
        match res {
            Ok(v) => Some(Frame::from_value(v)),
            Err(e) => Some(Err(FrameError::Malformed(e.to_string()))),
        }
    }
}
