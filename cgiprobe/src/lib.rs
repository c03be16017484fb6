//! CGI test endpoints.
//!
//! Each binary in this crate is a CGI script: the host passes request
//! metadata in the environment and the body on stdin, and reads the response
//! from stdout. Logs go to stderr.

use anyhow::{Context, Result};
use cgiprobe_core::config::ProbeConfig;
use cgiprobe_core::environment::EnvironmentSnapshot;
use cgiprobe_core::form::{decode_request, FormData};
use cgiprobe_core::observability::init_logging;
use cgiprobe_core::render::{RenderMode, Renderer};
use cgiprobe_core::request::CgiRequest;
use cgiprobe_core::response::ResponseHead;
use cgiprobe_core::stress::{pump, StressSource};
use std::io::{self, BufWriter, Read, Write};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Echo decoded fields as a table.
    FormEcho,
    /// Echo decoded fields and the environment.
    EnvEcho,
    /// Echo the uploaded `file` field as an inline image.
    UploadEcho,
    /// Emit output forever.
    Stress,
}

impl Endpoint {
    fn render_mode(self) -> Option<RenderMode> {
        match self {
            Endpoint::FormEcho => Some(RenderMode::FormEcho),
            Endpoint::EnvEcho => Some(RenderMode::FormEchoWithEnvironment),
            Endpoint::UploadEcho => Some(RenderMode::UploadEcho),
            Endpoint::Stress => None,
        }
    }
}

/// Serve one request on the process's stdin/stdout.
pub fn run(endpoint: Endpoint) -> Result<()> {
    let env = EnvironmentSnapshot::capture();
    let cfg = ProbeConfig::from_env(&env)?;
    init_logging(&cfg.log_filter)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(endpoint, env, &cfg, stdin.lock(), stdout.lock())
}

/// Serve one request from explicit streams.
pub fn serve<R: Read, W: Write>(
    endpoint: Endpoint,
    env: EnvironmentSnapshot,
    cfg: &ProbeConfig,
    input: R,
    output: W,
) -> Result<()> {
    let Some(mode) = endpoint.render_mode() else {
        return serve_stress(cfg, output);
    };

    let req = CgiRequest::from_env(&env);
    let form = match decode_request(&req, input, cfg) {
        Ok(form) => form,
        Err(e) => {
            warn!(
                error = %e,
                method = %req.request_method,
                "request decode failed; rendering empty form"
            );
            FormData::new()
        }
    };

    let out = BufWriter::new(output);
    Renderer::new(env)
        .render(mode, &form, out)
        .context("failed to write CGI response")?;
    Ok(())
}

fn serve_stress<W: Write>(cfg: &ProbeConfig, output: W) -> Result<()> {
    let source = StressSource::new(cfg.stress_block_bytes);
    info!(block_bytes = source.block_len(), "starting stress output");
    let body = ResponseHead::html()
        .send(output)
        .context("failed to write CGI response headers")?;
    match pump(source, body) {
        Ok(never) => match never {},
        Err(e) => Err(e).context("stress output interrupted"),
    }
}
