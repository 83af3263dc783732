fn main() {
    println!("Run `cargo test -p upload-flow` to execute the end-to-end upload tests.");
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use fotoferry_protocol::{
        ApiResponse, BOUNDARY, BinaryAttachment, MediaKind, Parameter, compute_multipart_length,
    };
    use fotoferry_transport::{RestClient, TransportConfig};
    use fotoferry_upload::{
        CancelCause, PROGRESS_DONE, PROGRESS_STREAM_LIMIT, SupervisorConfig, UploadError,
        UploadEvent, UploadOutcome, UploadRegistry, UploadTask, run_upload,
    };
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    fn request_complete(bytes: &[u8]) -> bool {
        let Some(header_end) = find_subsequence(bytes, b"\r\n\r\n") else {
            return false;
        };
        let headers = String::from_utf8_lossy(&bytes[..header_end]);
        let content_length = headers
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        bytes.len() >= header_end + 4 + content_length
    }

    async fn read_request(socket: &mut TcpStream) -> Vec<u8> {
        let mut captured = Vec::new();
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            captured.extend_from_slice(&buf[..n]);
            if request_complete(&captured) {
                break;
            }
        }
        captured
    }

    /// Serves one canned response per connection, capturing the raw
    /// request bytes.
    async fn mock_server(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, Arc<Mutex<Vec<u8>>>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let captured_task = captured.clone();
        let handle = tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(s) => s,
                    Err(_) => break,
                };
                let request = read_request(&mut socket).await;
                *captured_task.lock().unwrap() = request;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_line,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}"), captured, handle)
    }

    /// Reads the whole request and never answers.
    async fn serve_silence() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let _request = read_request(&mut socket).await;
            std::future::pending::<()>().await;
        });
        (format!("http://{addr}"), handle)
    }

    /// Reads a few KB and then leaves the connection hanging so the
    /// sender backs up mid-stream.
    async fn serve_stalled_read() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut taken = 0usize;
            let mut buf = vec![0u8; 4096];
            while taken < 8192 {
                match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => taken += n,
                }
            }
            std::future::pending::<()>().await;
        });
        (format!("http://{addr}"), handle)
    }

    fn build_task(
        url: String,
        media_id: &str,
        params: Vec<Parameter>,
        supervisor: SupervisorConfig,
    ) -> (Arc<UploadTask>, mpsc::Receiver<UploadEvent>, UploadRegistry) {
        let registry = UploadRegistry::new();
        let (events_tx, events_rx) = mpsc::channel(256);
        let client = RestClient::new(TransportConfig::new(url)).unwrap();
        let task = UploadTask::new(
            client,
            registry.clone(),
            media_id,
            params,
            events_tx,
            supervisor,
        );
        (task, events_rx, registry)
    }

    async fn drain_events(rx: &mut mpsc::Receiver<UploadEvent>) -> Vec<u16> {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event.progress);
            if event.progress == PROGRESS_DONE {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn successful_upload_streams_the_declared_length() {
        let (url, captured, handle) =
            mock_server("200 OK", r#"{"stat":"ok","photoid":{"_content":"72157719"}}"#).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, vec![0xC3u8; 150 * 1024]).unwrap();

        let params = vec![
            Parameter::text("api_key", "0a1b2c9d8e7f"),
            Parameter::text("auth_token", "72157-aa51"),
            Parameter::text("title", "Sunset beach"),
            Parameter::attachment(
                "photo",
                BinaryAttachment::from_file("photo.jpg", MediaKind::Image, "jpeg", &path).unwrap(),
            ),
        ];
        let declared = compute_multipart_length(&params, BOUNDARY);
        let (task, mut events_rx, registry) =
            build_task(url, "photo-1", params, SupervisorConfig::default());

        let outcome = run_upload(task).await;

        match outcome {
            UploadOutcome::Success(ApiResponse::Ok { payload, .. }) => {
                assert_eq!(payload["photoid"]["_content"].as_str(), Some("72157719"));
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert!(registry.is_empty());

        let request = captured.lock().unwrap().clone();
        let header_end = find_subsequence(&request, b"\r\n\r\n").unwrap();
        let headers = String::from_utf8_lossy(&request[..header_end]).to_string();
        let body = &request[header_end + 4..];

        assert!(headers.contains(&format!(
            "content-type: multipart/form-data; boundary={BOUNDARY}"
        )));
        assert!(headers.contains(&format!("content-length: {declared}")));
        assert!(!headers.to_ascii_lowercase().contains("transfer-encoding"));
        assert_eq!(body.len() as u64, declared);

        assert!(body.starts_with(format!("--{BOUNDARY}\r\n").as_bytes()));
        assert!(
            find_subsequence(body, b"Content-Disposition: form-data; name=\"api_key\"").is_some()
        );
        assert!(
            find_subsequence(
                body,
                b"Content-Disposition: form-data; name=\"photo\"; filename=\"photo.jpg\""
            )
            .is_some()
        );
        assert!(find_subsequence(body, b"Content-Type: image/jpeg").is_some());
        assert!(find_subsequence(body, &[0xC3u8; 64]).is_some());
        assert!(body.ends_with(format!("\r\n--{BOUNDARY}--\r\n\r\n").as_bytes()));

        let seen = drain_events(&mut events_rx).await;
        assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(seen.last(), Some(&PROGRESS_DONE));
        handle.abort();
    }

    #[tokio::test]
    async fn rejected_upload_surfaces_the_status() {
        let (url, _captured, handle) =
            mock_server("413 Payload Too Large", "upload limit exceeded").await;
        let (task, _events_rx, _registry) = build_task(
            url,
            "photo-2",
            vec![
                Parameter::text("api_key", "k"),
                Parameter::attachment(
                    "photo",
                    BinaryAttachment::from_memory("big.jpg", MediaKind::Image, "jpeg", vec![0; 4096]),
                ),
            ],
            SupervisorConfig::default(),
        );

        let outcome = run_upload(task).await;

        match outcome {
            UploadOutcome::Failed {
                error:
                    UploadError::Protocol {
                        status,
                        status_text,
                        body,
                    },
                cancel_cause: None,
            } => {
                assert_eq!(status, 413);
                assert_eq!(status_text, "Payload Too Large");
                assert_eq!(body, "upload limit exceeded");
            }
            other => panic!("expected protocol failure, got {other:?}"),
        }
        handle.abort();
    }

    #[tokio::test]
    async fn unparseable_reply_surfaces_a_decode_failure() {
        let (url, _captured, handle) = mock_server("200 OK", "<html>proxy error</html>").await;
        let (task, _events_rx, _registry) = build_task(
            url,
            "photo-3",
            vec![
                Parameter::text("api_key", "k"),
                Parameter::attachment(
                    "photo",
                    BinaryAttachment::from_memory("a.jpg", MediaKind::Image, "jpeg", vec![1; 512]),
                ),
            ],
            SupervisorConfig::default(),
        );

        let outcome = run_upload(task).await;
        assert!(matches!(
            outcome,
            UploadOutcome::Failed {
                error: UploadError::Decode(_),
                cancel_cause: None,
            }
        ));
        handle.abort();
    }

    #[tokio::test]
    async fn registry_cancel_stops_a_streaming_upload() {
        let (url, handle) = serve_stalled_read().await;
        let (task, mut events_rx, registry) = build_task(
            url,
            "photo-77",
            vec![
                Parameter::text("api_key", "k"),
                Parameter::attachment(
                    "photo",
                    BinaryAttachment::from_memory(
                        "huge.jpg",
                        MediaKind::Image,
                        "jpeg",
                        vec![0x5C; 4 * 1024 * 1024],
                    ),
                ),
            ],
            SupervisorConfig::default(),
        );

        let upload = tokio::spawn(run_upload(task));
        // Let the stream make visible progress before cancelling.
        loop {
            let event = events_rx.recv().await.unwrap();
            if (1..=PROGRESS_STREAM_LIMIT).contains(&event.progress) {
                break;
            }
        }
        registry.cancel("photo-77");

        let outcome = upload.await.unwrap();
        assert!(matches!(
            outcome,
            UploadOutcome::Cancelled(CancelCause::User)
        ));
        assert!(registry.get("photo-77").is_none());
        assert!(registry.is_empty());
        handle.abort();
    }

    #[tokio::test]
    async fn silent_server_trips_the_stall_watchdog() {
        let (url, handle) = serve_silence().await;
        let supervisor = SupervisorConfig {
            stall_window: Duration::from_millis(150),
            base_tick: Duration::from_millis(20),
            band_tick_step: Duration::from_millis(1),
        };
        let (task, _events_rx, _registry) = build_task(
            url,
            "photo-88",
            vec![
                Parameter::text("api_key", "k"),
                Parameter::attachment(
                    "photo",
                    BinaryAttachment::from_memory("a.jpg", MediaKind::Image, "jpeg", vec![2; 32 * 1024]),
                ),
            ],
            supervisor,
        );

        let outcome = run_upload(task).await;
        match outcome {
            UploadOutcome::Cancelled(CancelCause::Stalled { since_start }) => {
                assert!(since_start > Duration::ZERO);
            }
            other => panic!("expected stall cancellation, got {other:?}"),
        }
        handle.abort();
    }
}
