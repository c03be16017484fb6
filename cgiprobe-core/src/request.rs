use crate::config::LengthPolicy;
use crate::environment::EnvironmentSnapshot;
use crate::form::DecodeError;
use bytes::BytesMut;
use std::io::{ErrorKind, Read};
use tracing::{debug, warn};

/// Bytes pulled from the body stream per read.
pub const READ_CHUNK_BYTES: usize = 8192;

/// Request meta-variables handed to the script by the host (RFC 3875 §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiRequest {
    pub request_method: String,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub query_string: String,
    pub server_protocol: Option<String>,
    pub script_name: Option<String>,
    pub path_info: Option<String>,
    pub gateway_interface: Option<String>,
}

impl CgiRequest {
    pub fn from_env(env: &EnvironmentSnapshot) -> Self {
        let content_length = env
            .get_non_empty("CONTENT_LENGTH")
            .and_then(|raw| match raw.trim().parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!(content_length = raw, "ignoring unparsable CONTENT_LENGTH");
                    None
                }
            });

        let req = Self {
            request_method: env
                .get_non_empty("REQUEST_METHOD")
                .map(|m| m.trim().to_ascii_uppercase())
                .unwrap_or_else(|| "GET".to_string()),
            content_type: env.get_non_empty("CONTENT_TYPE").map(str::to_string),
            content_length,
            query_string: env.get("QUERY_STRING").unwrap_or_default().to_string(),
            server_protocol: env.get_non_empty("SERVER_PROTOCOL").map(str::to_string),
            script_name: env.get_non_empty("SCRIPT_NAME").map(str::to_string),
            path_info: env.get_non_empty("PATH_INFO").map(str::to_string),
            gateway_interface: env.get_non_empty("GATEWAY_INTERFACE").map(str::to_string),
        };
        debug!(
            method = %req.request_method,
            content_type = req.content_type.as_deref().unwrap_or(""),
            content_length = req.content_length,
            script_name = req.script_name.as_deref().unwrap_or(""),
            gateway = req.gateway_interface.as_deref().unwrap_or(""),
            "CGI request"
        );
        req
    }

    /// Whether fields come from the query string only.
    pub fn is_query_only(&self) -> bool {
        matches!(self.request_method.as_str(), "GET" | "HEAD")
    }
}

/// Bounded reader over the request body stream.
///
/// Never reads past the declared content length and refuses to hand out more
/// than `max_bytes` in total.
pub struct RequestBody<R> {
    inner: R,
    declared: Option<u64>,
    received: u64,
    max_bytes: u64,
    policy: LengthPolicy,
    eof: bool,
}

impl<R: Read> RequestBody<R> {
    pub fn new(inner: R, declared: Option<u64>, max_bytes: u64, policy: LengthPolicy) -> Self {
        Self {
            inner,
            declared,
            received: 0,
            max_bytes,
            policy,
            eof: false,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Append the next chunk to `buf`. Returns 0 once the body is exhausted.
    pub fn read_chunk(&mut self, buf: &mut BytesMut) -> Result<usize, DecodeError> {
        if self.eof {
            return Ok(0);
        }
        if let Some(declared) = self.declared {
            if declared > self.max_bytes {
                return Err(DecodeError::BodyTooLarge(self.max_bytes));
            }
        }

        let mut want = READ_CHUNK_BYTES as u64;
        if let Some(declared) = self.declared {
            want = want.min(declared - self.received);
        }
        if want == 0 {
            self.eof = true;
            return Ok(0);
        }

        let start = buf.len();
        buf.resize(start + want as usize, 0);
        let n = loop {
            match self.inner.read(&mut buf[start..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    buf.truncate(start);
                    return Err(e.into());
                }
            }
        };
        buf.truncate(start + n);

        if n == 0 {
            self.eof = true;
            if let Some(declared) = self.declared {
                if self.received < declared {
                    match self.policy {
                        LengthPolicy::Strict => {
                            return Err(DecodeError::Truncated {
                                declared,
                                received: self.received,
                            });
                        }
                        LengthPolicy::Lenient => warn!(
                            declared,
                            received = self.received,
                            "request body shorter than CONTENT_LENGTH"
                        ),
                    }
                }
            }
            return Ok(0);
        }

        self.received = self.received.saturating_add(n as u64);
        if self.received > self.max_bytes {
            return Err(DecodeError::BodyTooLarge(self.max_bytes));
        }
        Ok(n)
    }

    /// Read the whole (bounded) body into one buffer.
    pub fn read_to_end(&mut self) -> Result<BytesMut, DecodeError> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK_BYTES);
        while self.read_chunk(&mut buf)? > 0 {}
        Ok(buf)
    }
}
