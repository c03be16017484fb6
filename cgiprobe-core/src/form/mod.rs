//! Request body decoding into named fields.
//!
//! Two encodings are understood: `application/x-www-form-urlencoded` and
//! `multipart/form-data`. Query-string fields are merged in after the body
//! fields, using the same collision policy as [`FormData::insert`].

pub mod multipart;
pub mod urlencoded;

use crate::config::ProbeConfig;
use crate::request::{CgiRequest, RequestBody};
use bytes::Bytes;
use indexmap::IndexMap;
use std::io::Read;
use thiserror::Error;
use tracing::debug;

pub const URLENCODED: &str = "application/x-www-form-urlencoded";
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("multipart body has no usable boundary")]
    MissingBoundary,
    #[error("multipart part is not terminated by a boundary")]
    UnterminatedPart,
    #[error("malformed multipart part: {0}")]
    MalformedPart(String),
    #[error("request body exceeds configured limit: {0} bytes")]
    BodyTooLarge(u64),
    #[error("request body truncated: declared {declared} bytes, received {received}")]
    Truncated { declared: u64, received: u64 },
    #[error("failed to read request body: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    /// Opaque upload content. Never text-decoded.
    Binary(Bytes),
}

impl FieldValue {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FieldValue::Text(s) => s.as_bytes(),
            FieldValue::Binary(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: FieldValue,
    /// Client-supplied file name; present exactly when the field is a file upload.
    pub filename: Option<String>,
    /// `Content-Type` of a multipart part, if it declared one.
    pub content_type: Option<String>,
}

impl Field {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Text(value.into()),
            filename: None,
            content_type: None,
        }
    }

    pub fn file(name: impl Into<String>, filename: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            value: FieldValue::Binary(data),
            filename: Some(filename.into()),
            content_type: None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }
}

/// Insertion-ordered fields keyed by name.
///
/// Duplicate names are last-write-wins: the later value replaces the earlier
/// one, while the field keeps the position where the name first appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    fields: IndexMap<String, Field>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a field, returning the one it replaced.
    pub fn insert(&mut self, field: Field) -> Option<Field> {
        self.fields.insert(field.name.clone(), field)
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<Field> for FormData {
    fn from_iter<I: IntoIterator<Item = Field>>(iter: I) -> Self {
        let mut form = FormData::new();
        for field in iter {
            form.insert(field);
        }
        form
    }
}

/// Media type of a `Content-Type` value, lowercased and without parameters.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Decode every field of the request: body fields according to the declared
/// content type, followed by query-string fields.
pub fn decode_request<R: Read>(
    req: &CgiRequest,
    input: R,
    cfg: &ProbeConfig,
) -> Result<FormData, DecodeError> {
    let mut form = FormData::new();

    if !req.is_query_only() {
        let mut body = RequestBody::new(
            input,
            req.content_length,
            cfg.max_body_bytes,
            cfg.length_policy,
        );
        let content_type = req.content_type.as_deref().unwrap_or(URLENCODED);
        match media_type(content_type).as_str() {
            URLENCODED => {
                let raw = body.read_to_end()?;
                urlencoded::decode_into(&raw, &mut form);
            }
            MULTIPART_FORM_DATA => {
                let boundary = multipart::boundary_from_content_type(content_type)?;
                multipart::decode_into(&mut body, &boundary, &mut form)?;
            }
            other => debug!(content_type = other, "no form fields in request body"),
        }
        debug!(bytes = body.received(), fields = form.len(), "decoded request body");
    }

    urlencoded::decode_into(req.query_string.as_bytes(), &mut form);
    Ok(form)
}
