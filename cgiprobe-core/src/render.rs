use crate::environment::EnvironmentSnapshot;
use crate::form::{Field, FieldValue, FormData};
use crate::html::escape;
use crate::response::{ResponseBody, ResponseHead};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::write::EncoderWriter;
use std::io::{self, Write};
use tracing::debug;

/// Field name the upload endpoint reads its file from.
pub const UPLOAD_FIELD: &str = "file";

pub const DATA_URI_PREFIX: &str = "data:image/jpg;base64,";

/// Prepended to the heading in `<title>`.
pub const TITLE_PREFIX: &str = "webserv - ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// One table row per decoded field.
    FormEcho,
    /// The field table followed by every environment variable.
    FormEchoWithEnvironment,
    /// The uploaded `file` field inlined as a `data:` image.
    UploadEcho,
}

impl RenderMode {
    fn heading(self) -> &'static str {
        match self {
            RenderMode::FormEcho | RenderMode::UploadEcho => "CGI form test result",
            RenderMode::FormEchoWithEnvironment => "CGI environment test result",
        }
    }
}

/// Writes HTML responses for decoded requests.
#[derive(Debug, Clone)]
pub struct Renderer {
    env: EnvironmentSnapshot,
}

impl Renderer {
    pub fn new(env: EnvironmentSnapshot) -> Self {
        Self { env }
    }

    /// Write the complete response (header block, then body) to `out`.
    pub fn render<W: Write>(&self, mode: RenderMode, form: &FormData, out: W) -> io::Result<W> {
        let mut body = ResponseHead::html().send(out)?;
        write_page_start(&mut body, mode.heading())?;
        match mode {
            RenderMode::FormEcho => write_form_table(&mut body, form)?,
            RenderMode::FormEchoWithEnvironment => {
                write_form_table(&mut body, form)?;
                self.write_environment(&mut body)?;
            }
            RenderMode::UploadEcho => write_upload_image(&mut body, form.get(UPLOAD_FIELD))?,
        }
        write_page_end(&mut body)?;
        body.finish()
    }

    fn write_environment<W: Write>(&self, body: &mut ResponseBody<W>) -> io::Result<()> {
        writeln!(body, "<h2>Environment</h2>")?;
        writeln!(body, "<ul>")?;
        for (key, value) in self.env.iter() {
            writeln!(body, "<li>{}: {}</li>", escape(key), escape(value))?;
        }
        writeln!(body, "</ul>")
    }
}

fn write_page_start<W: Write>(body: &mut ResponseBody<W>, heading: &str) -> io::Result<()> {
    writeln!(body, "<html>")?;
    writeln!(body, "<head>")?;
    writeln!(body, "<title>{}{}</title>", TITLE_PREFIX, heading)?;
    writeln!(body, "</head>")?;
    writeln!(body, "<body>")?;
    writeln!(body, "<h1>{}</h1>", heading)
}

fn write_page_end<W: Write>(body: &mut ResponseBody<W>) -> io::Result<()> {
    writeln!(body, "</body>")?;
    writeln!(body, "</html>")
}

fn write_form_table<W: Write>(body: &mut ResponseBody<W>, form: &FormData) -> io::Result<()> {
    writeln!(body, "<table>")?;
    for field in form.iter() {
        writeln!(body, "<tr>")?;
        writeln!(body, "<th>{}</th>", escape(&field.name))?;
        match (&field.value, field.filename.as_deref()) {
            (FieldValue::Text(text), None) => writeln!(body, "<td>{}</td>", escape(text))?,
            (value, filename) => writeln!(
                body,
                "<td>[file: {}, {} bytes]</td>",
                escape(filename.unwrap_or_default()),
                value.len()
            )?,
        }
        writeln!(body, "</tr>")?;
    }
    writeln!(body, "</table>")
}

/// Emit the upload as an inline image. A missing, non-file or empty field
/// yields an empty `data:` URI.
fn write_upload_image<W: Write>(
    body: &mut ResponseBody<W>,
    field: Option<&Field>,
) -> io::Result<()> {
    write!(body, "<img src=\"{}", DATA_URI_PREFIX)?;
    match field.filter(|f| f.is_file()) {
        Some(file) => {
            let mut encoder = EncoderWriter::new(&mut *body, &BASE64);
            encoder.write_all(file.value.as_bytes())?;
            encoder.finish()?;
        }
        None => debug!(field = UPLOAD_FIELD, "no uploaded file in request"),
    }
    writeln!(body, "\">")
}
