//! Incremental `multipart/form-data` decoder (RFC 7578).
//!
//! The body is pulled from [`RequestBody`] in fixed-size chunks. Only the part
//! values themselves are retained; preamble, headers and delimiters are
//! dropped from the working buffer as soon as they are recognised.

use super::{DecodeError, Field, FieldValue, FormData};
use crate::request::{RequestBody, READ_CHUNK_BYTES};
use crate::response::find_header_end;
use bytes::{Buf, BytesMut};
use std::io::Read;

/// RFC 2046 §5.1.1.
pub const MAX_BOUNDARY_LEN: usize = 70;
pub const MAX_PART_HEADER_BYTES: usize = 8192;

/// Extract the `boundary` parameter of a `multipart/form-data` content type.
pub fn boundary_from_content_type(content_type: &str) -> Result<String, DecodeError> {
    for param in split_params(content_type).into_iter().skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("boundary") {
            continue;
        }
        let boundary = unquote(value.trim());
        if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
            return Err(DecodeError::MissingBoundary);
        }
        return Ok(boundary);
    }
    Err(DecodeError::MissingBoundary)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    AfterDelimiter,
    Headers,
    Body,
    Done,
}

#[derive(Debug, Default)]
struct PartHeaders {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
}

impl PartHeaders {
    fn parse(block: &[u8]) -> Result<Self, DecodeError> {
        let text = String::from_utf8_lossy(block);
        let mut headers = PartHeaders::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                return Err(DecodeError::MalformedPart(format!(
                    "invalid header line: {}",
                    line
                )));
            };
            let key = key.trim();
            let value = value.trim();
            if key.eq_ignore_ascii_case("content-disposition") {
                for param in split_params(value).into_iter().skip(1) {
                    let Some((k, v)) = param.split_once('=') else {
                        continue;
                    };
                    match k.trim().to_ascii_lowercase().as_str() {
                        "name" => headers.name = Some(unquote(v.trim())),
                        "filename" => headers.filename = Some(unquote(v.trim())),
                        _ => {}
                    }
                }
            } else if key.eq_ignore_ascii_case("content-type") {
                headers.content_type = Some(value.to_string());
            }
        }
        Ok(headers)
    }

    fn into_field(self, value: BytesMut) -> Result<Field, DecodeError> {
        let name = self
            .name
            .ok_or_else(|| DecodeError::MalformedPart("part has no field name".into()))?;
        let value = if self.filename.is_some() {
            FieldValue::Binary(value.freeze())
        } else {
            FieldValue::Text(String::from_utf8_lossy(&value).into_owned())
        };
        Ok(Field {
            name,
            value,
            filename: self.filename,
            content_type: self.content_type,
        })
    }
}

/// Decode all parts delimited by `boundary` into `form`.
///
/// Reaching the end of the body before the closing delimiter is an
/// [`DecodeError::UnterminatedPart`]; a body without any delimiter is
/// [`DecodeError::MissingBoundary`]. Anything after the closing delimiter is
/// read and discarded.
pub fn decode_into<R: Read>(
    body: &mut RequestBody<R>,
    boundary: &str,
    form: &mut FormData,
) -> Result<(), DecodeError> {
    let dash_boundary = format!("--{}", boundary).into_bytes();
    let delimiter = format!("\r\n--{}", boundary).into_bytes();

    let mut buf = BytesMut::with_capacity(READ_CHUNK_BYTES * 2);
    let mut value = BytesMut::new();
    let mut part: Option<PartHeaders> = None;
    let mut state = State::Preamble;
    let mut eof = false;
    // Whether `buf[0]` begins a line of the preamble.
    let mut line_start = true;

    loop {
        match state {
            State::Preamble => {
                if let Some(pos) = find_at_line_start(&buf, &dash_boundary, line_start) {
                    buf.advance(pos + dash_boundary.len());
                    state = State::AfterDelimiter;
                    continue;
                }
                if eof {
                    return Err(DecodeError::MissingBoundary);
                }
                let keep = dash_boundary.len() - 1;
                if buf.len() > keep {
                    let n = buf.len() - keep;
                    line_start = buf[n - 1] == b'\n';
                    buf.advance(n);
                }
            }
            State::AfterDelimiter => {
                // Transport padding (RFC 2046) may follow a delimiter.
                while matches!(buf.first(), Some(b' ' | b'\t')) {
                    buf.advance(1);
                }
                if buf.starts_with(b"--") {
                    state = State::Done;
                    continue;
                }
                if buf.starts_with(b"\r\n") {
                    buf.advance(2);
                    state = State::Headers;
                    continue;
                }
                if buf.starts_with(b"\n") {
                    buf.advance(1);
                    state = State::Headers;
                    continue;
                }
                if buf.len() >= 2 || (buf.len() == 1 && buf[0] != b'-' && buf[0] != b'\r') {
                    return Err(DecodeError::MalformedPart(
                        "unexpected bytes after boundary".into(),
                    ));
                }
                if eof {
                    return Err(DecodeError::UnterminatedPart);
                }
            }
            State::Headers => {
                let header_end = if buf.starts_with(b"\r\n") {
                    Some((0, 2))
                } else if buf.starts_with(b"\n") {
                    Some((0, 1))
                } else {
                    find_header_end(&buf)
                };
                if let Some((end, sep_len)) = header_end {
                    if end > MAX_PART_HEADER_BYTES {
                        return Err(header_limit_error());
                    }
                    part = Some(PartHeaders::parse(&buf[..end])?);
                    buf.advance(end + sep_len);
                    value.clear();
                    state = State::Body;
                    continue;
                }
                if buf.len() > MAX_PART_HEADER_BYTES + 4 {
                    return Err(header_limit_error());
                }
                if eof {
                    return Err(DecodeError::UnterminatedPart);
                }
            }
            State::Body => {
                if let Some(pos) = find(&buf, &delimiter) {
                    value.extend_from_slice(&buf[..pos]);
                    buf.advance(pos + delimiter.len());
                    if let Some(headers) = part.take() {
                        form.insert(headers.into_field(value.split())?);
                    }
                    state = State::AfterDelimiter;
                    continue;
                }
                if eof {
                    return Err(DecodeError::UnterminatedPart);
                }
                // Everything but a possible delimiter prefix is part content.
                let keep = delimiter.len() - 1;
                if buf.len() > keep {
                    let n = buf.len() - keep;
                    value.extend_from_slice(&buf[..n]);
                    buf.advance(n);
                }
            }
            State::Done => {
                buf.clear();
                while body.read_chunk(&mut buf)? > 0 {
                    buf.clear();
                }
                return Ok(());
            }
        }

        if body.read_chunk(&mut buf)? == 0 {
            eof = true;
        }
    }
}

fn header_limit_error() -> DecodeError {
    DecodeError::MalformedPart(format!(
        "part headers exceed {} bytes",
        MAX_PART_HEADER_BYTES
    ))
}

/// First occurrence of `needle` that begins a line. Offset 0 counts only
/// when `line_start` is set.
fn find_at_line_start(haystack: &[u8], needle: &[u8], line_start: bool) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .find(|&(i, w)| {
            let at_line = if i == 0 { line_start } else { haystack[i - 1] == b'\n' };
            at_line && w == needle
        })
        .map(|(i, _)| i)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split a header value on `;`, ignoring separators inside quoted strings.
fn split_params(value: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                out.push(value[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(value[start..].trim());
    out
}

fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
