use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::{timeout, Duration, Instant};

const BOUNDARY: &str = "----cgiprobeBoundary9f3a";

/// Run an endpoint binary the way a CGI host would: cleared environment,
/// request body on stdin, response read from stdout.
async fn run_cgi(bin: &str, env: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut child = Command::new(bin)
        .env_clear()
        .envs(env.iter().copied())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to start endpoint");

    let mut stdin = child.stdin.take().unwrap();
    stdin.write_all(body).await.unwrap();
    drop(stdin);

    let output = timeout(Duration::from_secs(10), child.wait_with_output())
        .await
        .expect("endpoint timed out")
        .unwrap();
    assert!(
        output.status.success(),
        "endpoint failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output.stdout
}

fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, value) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/jpeg\r\n\r\n",
                    name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            ),
        }
        body.extend_from_slice(value);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

#[tokio::test]
async fn form_echo_output_is_exact() {
    let body = b"name=Alice&age=30";
    let out = run_cgi(
        env!("CARGO_BIN_EXE_form_test_result"),
        &[
            ("GATEWAY_INTERFACE", "CGI/1.1"),
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_TYPE", "application/x-www-form-urlencoded"),
            ("CONTENT_LENGTH", "17"),
        ],
        body,
    )
    .await;

    let expected = "Content-Type: text/html\r\n\r\n\
                    <html>\n<head>\n<title>webserv - CGI form test result</title>\n</head>\n<body>\n\
                    <h1>CGI form test result</h1>\n\
                    <table>\n\
                    <tr>\n<th>name</th>\n<td>Alice</td>\n</tr>\n\
                    <tr>\n<th>age</th>\n<td>30</td>\n</tr>\n\
                    </table>\n\
                    </body>\n</html>\n";
    assert_eq!(String::from_utf8(out).unwrap(), expected);
}

#[tokio::test]
async fn form_echo_reads_query_string_on_get() {
    let out = run_cgi(
        env!("CARGO_BIN_EXE_form_test_result"),
        &[("REQUEST_METHOD", "GET"), ("QUERY_STRING", "q=a+b&flag")],
        b"",
    )
    .await;
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("<th>q</th>\n<td>a b</td>"), "output: {}", text);
    assert!(text.contains("<th>flag</th>\n<td></td>"), "output: {}", text);
}

#[tokio::test]
async fn env_echo_escapes_environment() {
    let out = run_cgi(
        env!("CARGO_BIN_EXE_env_test_result"),
        &[
            ("PATH", "/bin:/usr/bin"),
            ("HTTP_X_PROBE", "<script>alert(1)</script>"),
            ("REQUEST_METHOD", "GET"),
            ("QUERY_STRING", "k=v"),
        ],
        b"",
    )
    .await;
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("Content-Type: text/html\r\n\r\n"));
    assert!(text.contains("<li>PATH: /bin:/usr/bin</li>\n"));
    assert!(text.contains("<li>HTTP_X_PROBE: &lt;script&gt;alert(1)&lt;/script&gt;</li>\n"));
    assert!(text.contains("<li>QUERY_STRING: k=v</li>\n"));
    assert!(text.contains("<th>k</th>\n<td>v</td>"));
    assert!(!text.contains("<script>"));
}

#[tokio::test]
async fn upload_echo_inlines_binary_file() {
    let blob: &[u8] = &[0xFF, 0x00, 0x10];
    let body = multipart_body(&[("note", None, b"hi"), ("file", Some("pixel.jpg"), blob)]);
    let content_type = format!("multipart/form-data; boundary={}", BOUNDARY);
    let content_length = body.len().to_string();
    let out = run_cgi(
        env!("CARGO_BIN_EXE_upload_test_result"),
        &[
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_TYPE", &content_type),
            ("CONTENT_LENGTH", &content_length),
        ],
        &body,
    )
    .await;
    let text = String::from_utf8(out).unwrap();
    let expected = format!("<img src=\"data:image/jpg;base64,{}\">\n", BASE64.encode(blob));
    assert_eq!(expected, "<img src=\"data:image/jpg;base64,/wAQ\">\n");
    assert!(text.contains(&expected), "output: {}", text);
}

#[tokio::test]
async fn upload_echo_round_trips_large_file() {
    let blob: Vec<u8> = (0..200_000u32).map(|i| (i.wrapping_mul(31) % 256) as u8).collect();
    let body = multipart_body(&[("file", Some("big.bin"), &blob)]);
    let content_type = format!("multipart/form-data; boundary={}", BOUNDARY);
    let out = run_cgi(
        env!("CARGO_BIN_EXE_upload_test_result"),
        &[("REQUEST_METHOD", "POST"), ("CONTENT_TYPE", &content_type)],
        &body,
    )
    .await;
    let text = String::from_utf8(out).unwrap();
    let start = text.find("base64,").unwrap() + "base64,".len();
    let end = start + text[start..].find('"').unwrap();
    assert_eq!(BASE64.decode(&text[start..end]).unwrap(), blob);
}

#[tokio::test]
async fn upload_echo_without_file_is_well_formed() {
    let out = run_cgi(
        env!("CARGO_BIN_EXE_upload_test_result"),
        &[("REQUEST_METHOD", "GET")],
        b"",
    )
    .await;
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.matches("Content-Type: text/html\r\n\r\n").count(), 1);
    assert!(text.contains("<img src=\"data:image/jpg;base64,\">\n"));
    assert!(text.ends_with("</html>\n"));
}

#[tokio::test]
async fn strict_length_policy_renders_empty_form_on_short_body() {
    let out = run_cgi(
        env!("CARGO_BIN_EXE_form_test_result"),
        &[
            ("REQUEST_METHOD", "POST"),
            ("CONTENT_TYPE", "application/x-www-form-urlencoded"),
            ("CONTENT_LENGTH", "100"),
            ("CGIPROBE_LENGTH_POLICY", "strict"),
        ],
        b"name=Alice",
    )
    .await;
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("<table>\n</table>\n"), "output: {}", text);
}

#[tokio::test]
async fn invalid_probe_config_fails_before_output() {
    let output = Command::new(env!("CARGO_BIN_EXE_form_test_result"))
        .env_clear()
        .env("CGIPROBE_MAX_BODY_BYTES", "zero")
        .stdin(Stdio::null())
        .output()
        .await
        .unwrap();
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[cfg(target_os = "linux")]
fn resident_kib(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse().ok())
}

/// Drains the stress endpoint for two seconds and checks its own memory
/// stays flat while the output keeps coming.
#[cfg(target_os = "linux")]
#[tokio::test]
async fn stress_output_is_unbounded_with_flat_memory() {
    const CEILING_KIB: u64 = 256 * 1024;

    let mut child = Command::new(env!("CARGO_BIN_EXE_oom"))
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to start oom endpoint");
    let pid = child.id().unwrap();
    let mut stdout = child.stdout.take().unwrap();

    let mut head = Vec::new();
    let mut total: u64 = 0;
    let mut peak_kib = 0;
    let mut buf = vec![0u8; 1 << 20];
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        let n = timeout(Duration::from_secs(5), stdout.read(&mut buf))
            .await
            .expect("stress output stalled")
            .unwrap();
        assert!(n > 0, "stress output ended");
        if head.len() < 64 {
            head.extend_from_slice(&buf[..n.min(64)]);
        }
        total += n as u64;
        if let Some(kib) = resident_kib(pid) {
            peak_kib = peak_kib.max(kib);
        }
    }

    child.kill().await.unwrap();

    assert!(head.starts_with(b"Content-Type: text/html\r\n\r\n0123456789abcdef0123"));
    // More than one 64 MiB block went by.
    assert!(total > 64 * 1024 * 1024, "only {} bytes in 2s", total);
    assert!(
        peak_kib < CEILING_KIB,
        "stress endpoint resident set grew to {} KiB",
        peak_kib
    );
}
