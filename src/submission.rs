use crate::dot_bracket::CandidateStructure;
use crate::motif::{motif_from_record, Motif};
use crate::stream::{StreamDecoder, StreamEvent};
use serde_json::json;
use std::{
    fmt, io,
    io::Read,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread,
    time::Duration,
};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";
pub const API_URL_ENV: &str = "MOTIF_ATLAS_API_URL";
const SUBMIT_PATH: &str = "/new";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";
const READ_CHUNK_BYTES: usize = 8192;
/// Upper bound on how long a cancel can go unnoticed while the stream is
/// quiet.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Base URL of the analysis backend, overridable via `MOTIF_ATLAS_API_URL`.
pub fn api_base_url() -> String {
    std::env::var(API_URL_ENV)
        .ok()
        .map(|v| v.trim().trim_end_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}

/// Shared abort flag for one submission attempt. Cancelling is sticky and
/// idempotent; every clone observes the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    /// The endpoint answered with something other than an event stream, so no
    /// incremental reading is possible.
    StreamingUnsupported { content_type: String },
    /// The backend reported a job failure, either via HTTP status or an
    /// explicit error record; the message is surfaced verbatim.
    Backend(String),
    /// User-initiated cancellation. Never shown as a failure.
    Aborted,
    /// The backend could not be reached or the stream broke mid-read.
    Network(String),
}

impl SubmissionError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamingUnsupported { content_type } => write!(
                f,
                "Backend did not answer with an event stream (got content type '{content_type}')"
            ),
            Self::Backend(message) => write!(f, "{message}"),
            Self::Aborted => write!(f, "Submission cancelled"),
            Self::Network(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for SubmissionError {}

/// Submits a validated structure to the analysis backend and consumes the
/// progress stream until it ends. Progress lines are forwarded to
/// `on_progress` in arrival order; the final motif list (possibly empty) is
/// the success value. The body is read on a helper thread so the token is
/// re-checked at least every [`CANCEL_POLL_INTERVAL`]; a cancel takes effect
/// even while the stream carries no bytes.
pub fn submit_structure(
    base_url: &str,
    structure: &CandidateStructure,
    on_progress: &mut dyn FnMut(&str),
    cancel: &CancelToken,
) -> Result<Vec<Motif>, SubmissionError> {
    if cancel.is_cancelled() {
        return Err(SubmissionError::Aborted);
    }
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        // The analysis job is long-running; only the connect phase is bounded.
        .timeout(None::<Duration>)
        .build()
        .map_err(|e| SubmissionError::Network(format!("could not build HTTP client: {e}")))?;

    let response = client
        .post(format!("{base_url}{SUBMIT_PATH}"))
        .header("Content-Type", "application/json")
        .json(&json!({ "structure": structure.as_str() }))
        .send()
        .map_err(|e| {
            if cancel.is_cancelled() {
                SubmissionError::Aborted
            } else {
                SubmissionError::Network(format!("analysis request failed: {e}"))
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(SubmissionError::Backend(format!(
            "analysis request rejected (status={status}): {}",
            body.trim()
        )));
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.starts_with(EVENT_STREAM_CONTENT_TYPE) {
        return Err(SubmissionError::StreamingUnsupported { content_type });
    }

    // Reading happens on a helper thread; the loop below only ever blocks on
    // the channel, bounded by the poll interval. On cancellation the reader
    // is abandoned with its socket, not joined.
    let (chunk_sender, chunks) = mpsc::channel::<io::Result<Vec<u8>>>();
    thread::spawn(move || {
        let mut response = response;
        let mut buffer = [0u8; READ_CHUNK_BYTES];
        loop {
            match response.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if chunk_sender.send(Ok(buffer[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = chunk_sender.send(Err(e));
                    break;
                }
            }
        }
    });

    let mut decoder = StreamDecoder::new();
    let mut motifs: Vec<Motif> = Vec::new();
    loop {
        if cancel.is_cancelled() {
            return Err(SubmissionError::Aborted);
        }
        let chunk = match chunks.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(Ok(chunk)) => chunk,
            Ok(Err(e)) => {
                if cancel.is_cancelled() {
                    return Err(SubmissionError::Aborted);
                }
                return Err(SubmissionError::Network(format!(
                    "could not read analysis stream: {e}"
                )));
            }
            Err(RecvTimeoutError::Timeout) => continue,
            // Reader exited after a clean end of stream.
            Err(RecvTimeoutError::Disconnected) => break,
        };
        for event in decoder.push(&chunk) {
            match event {
                StreamEvent::Progress(message) => on_progress(&message),
                StreamEvent::Error(message) => return Err(SubmissionError::Backend(message)),
                StreamEvent::Batch {
                    motifs: records,
                    svgs,
                } => {
                    for (index, record) in records.into_iter().enumerate() {
                        motifs.push(motif_from_record(record, svgs.get(index)));
                    }
                }
            }
        }
    }
    // Clean stream end with zero batches is the valid "no motifs found" case.
    Ok(motifs)
}

/// [`submit_structure`] against the configured backend.
pub fn submit(
    structure: &CandidateStructure,
    on_progress: &mut dyn FnMut(&str),
    cancel: &CancelToken,
) -> Result<Vec<Motif>, SubmissionError> {
    submit_structure(&api_base_url(), structure, on_progress, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dot_bracket::validate_structure;
    use std::io::Write;
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::sync::mpsc::channel;

    const STREAM_HEADER: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n";

    // The request body is a small JSON object, so the request is complete
    // once the header terminator and the closing brace have arrived.
    fn drain_request(socket: &mut TcpStream) {
        let mut data = Vec::new();
        let mut buffer = [0u8; 1024];
        loop {
            let n = match socket.read(&mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            data.extend_from_slice(&buffer[..n]);
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                if data[pos + 4..].ends_with(b"}") {
                    break;
                }
            }
        }
    }

    /// One-request backend: answers with `response` and closes, which ends
    /// the body for the `Connection: close` stream responses.
    fn spawn_backend(response: Vec<u8>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().expect("accept");
            drain_request(&mut socket);
            let _ = socket.write_all(&response);
        });
        addr
    }

    fn submit_to(
        addr: SocketAddr,
        lines: &mut Vec<String>,
        token: &CancelToken,
    ) -> Result<Vec<Motif>, SubmissionError> {
        let structure = validate_structure("(...)").expect("valid");
        submit_structure(
            &format!("http://{addr}"),
            &structure,
            &mut |line| lines.push(line.to_string()),
            token,
        )
    }

    #[test]
    fn cancel_is_sticky_and_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn pre_cancelled_submission_aborts_without_a_request() {
        let structure = validate_structure("(...)").expect("valid");
        let token = CancelToken::new();
        token.cancel();
        let mut progress_lines = 0usize;
        // An unroutable base URL proves no connection is attempted.
        let result = submit_structure(
            "http://192.0.2.1:1",
            &structure,
            &mut |_| progress_lines += 1,
            &token,
        );
        assert_eq!(result, Err(SubmissionError::Aborted));
        assert_eq!(progress_lines, 0);
    }

    #[test]
    fn aborted_is_distinguishable_from_failure() {
        assert!(SubmissionError::Aborted.is_aborted());
        assert!(!SubmissionError::Backend("boom".to_string()).is_aborted());
        assert!(!SubmissionError::Network("down".to_string()).is_aborted());
    }

    #[test]
    fn error_record_rejects_and_stops_processing() {
        let addr = spawn_backend(
            [
                STREAM_HEADER,
                b"data: {\"progress\": \"[ProgressInfo] starting\"}\n\n\
                  data: {\"error\": \"boom\"}\n\n\
                  data: {\"progress\": \"never dispatched\"}\n\n"
                    .as_slice(),
            ]
            .concat(),
        );
        let mut lines = Vec::new();
        let result = submit_to(addr, &mut lines, &CancelToken::new());
        assert_eq!(result, Err(SubmissionError::Backend("boom".to_string())));
        assert_eq!(lines, vec!["[ProgressInfo] starting".to_string()]);
    }

    #[test]
    fn empty_stream_resolves_to_no_motifs() {
        let addr = spawn_backend(
            [
                STREAM_HEADER,
                b"data: {\"progress\": \"[ProgressInfo] starting\"}\n\n\
                  data: {\"message\": \"Task completed successfully.\"}\n\n"
                    .as_slice(),
            ]
            .concat(),
        );
        let mut lines = Vec::new();
        let result = submit_to(addr, &mut lines, &CancelToken::new());
        assert_eq!(result, Ok(vec![]));
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn batch_records_accumulate_motifs_with_their_diagrams() {
        let addr = spawn_backend(
            [
                STREAM_HEADER,
                b"data: {\"motifs\": [{\"id_uniq\": 7, \"is_duplicated\": false, \
                  \"dot_bracket\": \"(...)\"}], \
                  \"svgs\": [{\"id\": \"ymotif1\", \"content\": \"<svg/>\"}]}\n\n"
                    .as_slice(),
            ]
            .concat(),
        );
        let mut lines = Vec::new();
        let motifs = submit_to(addr, &mut lines, &CancelToken::new()).expect("stream succeeds");
        assert_eq!(motifs.len(), 1);
        assert!(motifs[0].is_new());
        assert_eq!(motifs[0].svg, "<svg/>");
    }

    #[test]
    fn non_stream_response_is_streaming_unsupported() {
        let addr = spawn_backend(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
              Content-Length: 2\r\nConnection: close\r\n\r\n{}"
                .to_vec(),
        );
        let mut lines = Vec::new();
        let result = submit_to(addr, &mut lines, &CancelToken::new());
        assert_eq!(
            result,
            Err(SubmissionError::StreamingUnsupported {
                content_type: "application/json".to_string()
            })
        );
    }

    #[test]
    fn cancel_during_a_quiet_stream_aborts_promptly() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().expect("accept");
            drain_request(&mut socket);
            let _ = socket.write_all(
                &[
                    STREAM_HEADER,
                    b"data: {\"progress\": \"[ProgressInfo] starting\"}\n\n".as_slice(),
                ]
                .concat(),
            );
            // Hold the connection open without sending another byte.
            let mut sink = [0u8; 64];
            while let Ok(n) = socket.read(&mut sink) {
                if n == 0 {
                    break;
                }
            }
        });

        let token = CancelToken::new();
        let worker_token = token.clone();
        let (done_sender, done) = channel();
        thread::spawn(move || {
            let mut lines = Vec::new();
            let _ = done_sender.send(submit_to(addr, &mut lines, &worker_token));
        });

        thread::sleep(Duration::from_millis(300));
        token.cancel();
        let result = done
            .recv_timeout(Duration::from_secs(2))
            .expect("cancel was not observed while the stream was quiet");
        assert_eq!(result, Err(SubmissionError::Aborted));
    }

    #[test]
    fn env_override_trims_trailing_slash() {
        // Exercised via the helper on the raw value to avoid mutating process env.
        let raw = "http://example.org:5000/";
        assert_eq!(raw.trim().trim_end_matches('/'), "http://example.org:5000");
        assert_eq!(api_base_url().is_empty(), false);
    }
}
