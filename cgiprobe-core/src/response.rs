use std::fmt::Write as _;
use std::io::{self, Write};

pub const TEXT_HTML: &str = "text/html";

/// Header block of a CGI response.
///
/// Sending it consumes the value and yields the [`ResponseBody`], so a
/// response can transition to "headers sent" exactly once, and no body byte
/// can be written before `Content-Type` is on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    headers: Vec<(String, String)>,
}

impl ResponseHead {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            headers: vec![("Content-Type".to_string(), content_type.into())],
        }
    }

    pub fn html() -> Self {
        Self::new(TEXT_HTML)
    }

    /// CRLF-terminated header lines followed by the blank line.
    pub fn encode(&self) -> String {
        let size: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len() + 4)
            .sum::<usize>()
            + 2;
        let mut out = String::with_capacity(size);
        for (k, v) in &self.headers {
            let _ = write!(out, "{}: {}\r\n", k, v);
        }
        out.push_str("\r\n");
        out
    }

    pub fn send<W: Write>(self, mut out: W) -> io::Result<ResponseBody<W>> {
        out.write_all(self.encode().as_bytes())?;
        Ok(ResponseBody { out })
    }
}

/// Body stream of a response whose header block has already been written.
#[derive(Debug)]
pub struct ResponseBody<W: Write> {
    out: W,
}

impl<W: Write> ResponseBody<W> {
    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

impl<W: Write> Write for ResponseBody<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.out.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// A CGI response as seen by the host: headers split from the body.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CgiOutput {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[cfg(test)]
impl CgiOutput {
    /// Split raw script output at the first blank line (CRLF or LF form).
    pub(crate) fn parse(data: &[u8]) -> anyhow::Result<Self> {
        let (header_end, sep_len) = find_header_end(data)
            .ok_or_else(|| anyhow::anyhow!("CGI output has no header terminator"))?;
        let header_section = std::str::from_utf8(&data[..header_end])?;

        let mut headers = Vec::new();
        for line in header_section.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("invalid CGI header line: {}", line))?;
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
        Ok(Self {
            headers,
            body: data[header_end + sep_len..].to_vec(),
        })
    }

    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Position of the blank line ending a header block and the separator length.
pub(crate) fn find_header_end(data: &[u8]) -> Option<(usize, usize)> {
    (0..data.len()).find_map(|i| {
        if data[i..].starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if data[i..].starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}
