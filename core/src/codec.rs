//! Binary table codec for guest calls and host responses.
//!
//! # Design
//! A table is a flat run of fields, each `[tag u8][len u32 LE][value]`.
//! Scalars are little-endian and must have exactly their natural width,
//! strings are UTF-8, and nested tables are stored inline as a field value.
//!
//! - Fields holding their default value are omitted on encode; absent fields
//!   decode to the default. Older readers skip tags they do not know, so new
//!   fields can be added without breaking stored state.
//! - Decoding is a single forward pass that borrows from the input.
//! - Encoding appends to a caller-supplied buffer, which lets replies be
//!   written straight into a packet's content area.
//!
//! ```text
//! Call          1 function_type u8 (0 none, 1 HTTPRequest)   2 function table
//! HTTPRequest   1 method  2 uri  3 content_type  4 body
//! HTTPResponse  1 status_code i32  2 content_length i64  3 content_type
//!               4 body  5 body_stream_id i32 (absent: -1)
//! ```

use bytes::{Buf, BufMut};

use crate::error::CodecError;

/// `body_stream_id` value meaning "no stream".
pub const NO_STREAM: i32 = -1;

const FIELD_HEADER_SIZE: usize = 5;

const CALL_FUNCTION_TYPE: u8 = 1;
const CALL_FUNCTION: u8 = 2;

const REQUEST_METHOD: u8 = 1;
const REQUEST_URI: u8 = 2;
const REQUEST_CONTENT_TYPE: u8 = 3;
const REQUEST_BODY: u8 = 4;

const RESPONSE_STATUS_CODE: u8 = 1;
const RESPONSE_CONTENT_LENGTH: u8 = 2;
const RESPONSE_CONTENT_TYPE: u8 = 3;
const RESPONSE_BODY: u8 = 4;
const RESPONSE_BODY_STREAM_ID: u8 = 5;

/// Tag selecting the function a call invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionType {
    None = 0,
    HttpRequest = 1,
}

/// Outbound HTTP request as described by the guest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// The function selected by a call, with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Function {
    HttpRequest(HttpRequest),
}

impl Function {
    pub fn function_type(&self) -> FunctionType {
        match self {
            Function::HttpRequest(_) => FunctionType::HttpRequest,
        }
    }
}

/// Decoded content of a call packet. `function` is `None` when the call
/// selects no function or one this service does not recognize.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Call {
    pub function: Option<Function>,
}

impl Call {
    pub fn http(request: HttpRequest) -> Self {
        Self {
            function: Some(Function::HttpRequest(request)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let mut w = TableWriter::new(buf);
        let Some(function) = &self.function else {
            return;
        };
        w.u8(CALL_FUNCTION_TYPE, function.function_type() as u8);
        match function {
            Function::HttpRequest(req) => w.table(CALL_FUNCTION, |w| {
                w.str(REQUEST_METHOD, &req.method);
                w.str(REQUEST_URI, &req.uri);
                w.str(REQUEST_CONTENT_TYPE, &req.content_type);
                w.bytes(REQUEST_BODY, &req.body);
            }),
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut function_type = FunctionType::None as u8;
        let mut table = None;
        for field in fields(buf) {
            let field = field?;
            match field.tag {
                CALL_FUNCTION_TYPE => function_type = field.to_u8()?,
                CALL_FUNCTION => table = Some(field.value),
                _ => {}
            }
        }

        let function = match (function_type, table) {
            (t, Some(table)) if t == FunctionType::HttpRequest as u8 => {
                Some(Function::HttpRequest(decode_request(table)?))
            }
            (t, _) => {
                if t != FunctionType::None as u8 {
                    tracing::debug!(function_type = t, "call selects an unrecognized function");
                }
                None
            }
        };
        Ok(Self { function })
    }
}

fn decode_request(buf: &[u8]) -> Result<HttpRequest, CodecError> {
    let mut req = HttpRequest::default();
    for field in fields(buf) {
        let field = field?;
        match field.tag {
            REQUEST_METHOD => req.method = field.to_string()?,
            REQUEST_URI => req.uri = field.to_string()?,
            REQUEST_CONTENT_TYPE => req.content_type = field.to_string()?,
            REQUEST_BODY => req.body = field.value.to_vec(),
            _ => {}
        }
    }
    Ok(req)
}

/// Response returned to the guest.
///
/// At most one of `body` and `body_stream_id` carries data: an inline body
/// comes with `NO_STREAM`, and a non-negative stream id comes with an empty
/// body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: i32,
    pub content_length: i64,
    pub content_type: String,
    pub body: Vec<u8>,
    pub body_stream_id: i32,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            status_code: 0,
            content_length: 0,
            content_type: String::new(),
            body: Vec::new(),
            body_stream_id: NO_STREAM,
        }
    }
}

impl HttpResponse {
    /// A response carrying nothing but a status code.
    pub fn status(status_code: i32) -> Self {
        Self {
            status_code,
            ..Self::default()
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let mut w = TableWriter::new(buf);
        w.i32(RESPONSE_STATUS_CODE, self.status_code, 0);
        w.i64(RESPONSE_CONTENT_LENGTH, self.content_length, 0);
        w.str(RESPONSE_CONTENT_TYPE, &self.content_type);
        w.bytes(RESPONSE_BODY, &self.body);
        w.i32(RESPONSE_BODY_STREAM_ID, self.body_stream_id, NO_STREAM);
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut res = Self::default();
        for field in fields(buf) {
            let field = field?;
            match field.tag {
                RESPONSE_STATUS_CODE => res.status_code = field.to_i32()?,
                RESPONSE_CONTENT_LENGTH => res.content_length = field.to_i64()?,
                RESPONSE_CONTENT_TYPE => res.content_type = field.to_string()?,
                RESPONSE_BODY => res.body = field.value.to_vec(),
                RESPONSE_BODY_STREAM_ID => res.body_stream_id = field.to_i32()?,
                _ => {}
            }
        }
        Ok(res)
    }
}

// ---------------------------------------------------------------------------
// Table primitives
// ---------------------------------------------------------------------------

struct TableWriter<'a> {
    buf: &'a mut Vec<u8>,
}

impl<'a> TableWriter<'a> {
    fn new(buf: &'a mut Vec<u8>) -> Self {
        Self { buf }
    }

    fn field(&mut self, tag: u8, value: &[u8]) {
        self.buf.put_u8(tag);
        self.buf.put_u32_le(value.len() as u32);
        self.buf.put_slice(value);
    }

    fn bytes(&mut self, tag: u8, value: &[u8]) {
        if !value.is_empty() {
            self.field(tag, value);
        }
    }

    fn str(&mut self, tag: u8, value: &str) {
        self.bytes(tag, value.as_bytes());
    }

    fn u8(&mut self, tag: u8, value: u8) {
        if value != 0 {
            self.field(tag, &[value]);
        }
    }

    fn i32(&mut self, tag: u8, value: i32, default: i32) {
        if value != default {
            self.field(tag, &value.to_le_bytes());
        }
    }

    fn i64(&mut self, tag: u8, value: i64, default: i64) {
        if value != default {
            self.field(tag, &value.to_le_bytes());
        }
    }

    /// Write a nested table in place, patching its length afterwards.
    fn table(&mut self, tag: u8, fill: impl FnOnce(&mut TableWriter<'_>)) {
        self.buf.put_u8(tag);
        let len_at = self.buf.len();
        self.buf.put_u32_le(0);
        fill(&mut TableWriter::new(self.buf));
        let len = (self.buf.len() - len_at - 4) as u32;
        (&mut self.buf[len_at..]).put_u32_le(len);
    }
}

struct Field<'a> {
    tag: u8,
    value: &'a [u8],
}

impl<'a> Field<'a> {
    fn sized(&self, expected: usize) -> Result<&'a [u8], CodecError> {
        if self.value.len() != expected {
            return Err(CodecError::FieldSize {
                tag: self.tag,
                len: self.value.len(),
                expected,
            });
        }
        Ok(self.value)
    }

    fn to_u8(&self) -> Result<u8, CodecError> {
        Ok(self.sized(1)?.get_u8())
    }

    fn to_i32(&self) -> Result<i32, CodecError> {
        Ok(self.sized(4)?.get_i32_le())
    }

    fn to_i64(&self) -> Result<i64, CodecError> {
        Ok(self.sized(8)?.get_i64_le())
    }

    fn to_string(&self) -> Result<String, CodecError> {
        std::str::from_utf8(self.value)
            .map(str::to_string)
            .map_err(|_| CodecError::Utf8 { tag: self.tag })
    }
}

fn fields(buf: &[u8]) -> impl Iterator<Item = Result<Field<'_>, CodecError>> {
    let mut rest = buf;
    let mut failed = false;
    std::iter::from_fn(move || {
        if failed || !rest.has_remaining() {
            return None;
        }
        if rest.remaining() < FIELD_HEADER_SIZE {
            failed = true;
            return Some(Err(CodecError::Truncated));
        }
        let tag = rest.get_u8();
        let len = rest.get_u32_le() as usize;
        if rest.remaining() < len {
            failed = true;
            return Some(Err(CodecError::Truncated));
        }
        let (value, tail) = rest.split_at(len);
        rest = tail;
        Some(Ok(Field { tag, value }))
    })
}
