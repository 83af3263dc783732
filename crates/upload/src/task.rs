//! The upload task state machine.
//!
//! One task owns one in-flight multipart request. A spawned worker
//! streams the body through an in-memory pipe while the request is in
//! flight; a supervisor task watches progress and kills the upload
//! when it stalls. Cancellation is cooperative at the I/O level:
//! firing the token drops the request, which closes the pipe the body
//! writer is blocked on.

use std::io;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use fotoferry_protocol::{
    ApiResponse, BOUNDARY, Parameter, compute_multipart_length, decode_response,
    write_multipart_body,
};
use fotoferry_transport::RestClient;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::{
    PROGRESS_AWAITING, PROGRESS_DONE, PROGRESS_PARSING, PROGRESS_STREAM_LIMIT, UploadEvent,
};
use crate::outcome::{CancelCause, UploadError, UploadOutcome};
use crate::registry::UploadRegistry;
use crate::supervisor::{SupervisorConfig, supervise};

/// Buffer size of the in-memory body pipe.
const BODY_PIPE_CAPACITY: usize = 64 * 1024;

/// Lifecycle states, in order. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskState {
    Created,
    Connecting,
    HeadersSent,
    StreamingBody,
    AwaitingResponse,
    ParsingResponse,
    Terminated,
}

/// Mutable task state, all under the one per-task lock.
struct TaskShared {
    state: TaskState,
    cancel_cause: Option<CancelCause>,
    last_progress: u16,
    outcome_tx: Option<oneshot::Sender<UploadOutcome>>,
    started_at: Option<Instant>,
    started_at_utc: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

/// One in-flight upload.
pub struct UploadTask {
    media_id: String,
    params: Arc<Vec<Parameter>>,
    client: RestClient,
    registry: UploadRegistry,
    events_tx: mpsc::Sender<UploadEvent>,
    supervisor: SupervisorConfig,
    cancel: CancellationToken,
    shared: Mutex<TaskShared>,
    result_rx: Mutex<Option<oneshot::Receiver<UploadOutcome>>>,
}

impl UploadTask {
    /// Creates a task in the Created state; `start` spawns the work.
    pub fn new(
        client: RestClient,
        registry: UploadRegistry,
        media_id: impl Into<String>,
        params: Vec<Parameter>,
        events_tx: mpsc::Sender<UploadEvent>,
        supervisor: SupervisorConfig,
    ) -> Arc<Self> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        Arc::new(Self {
            media_id: media_id.into(),
            params: Arc::new(params),
            client,
            registry,
            events_tx,
            supervisor,
            cancel: CancellationToken::new(),
            shared: Mutex::new(TaskShared {
                state: TaskState::Created,
                cancel_cause: None,
                last_progress: 0,
                outcome_tx: Some(outcome_tx),
                started_at: None,
                started_at_utc: None,
                completed_at: None,
            }),
            result_rx: Mutex::new(Some(outcome_rx)),
        })
    }

    pub fn media_id(&self) -> &str {
        &self.media_id
    }

    /// Last reported progress value.
    pub fn progress(&self) -> u16 {
        self.shared.lock().unwrap().last_progress
    }

    pub fn state(&self) -> TaskState {
        self.shared.lock().unwrap().state
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == TaskState::Terminated
    }

    /// Wall-clock start time, once started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().unwrap().started_at_utc
    }

    /// Wall-clock completion time, once terminated.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.shared.lock().unwrap().completed_at
    }

    pub(crate) fn is_killed(&self) -> bool {
        self.shared.lock().unwrap().cancel_cause.is_some()
    }

    pub(crate) fn supervisor_config(&self) -> &SupervisorConfig {
        &self.supervisor
    }

    pub(crate) fn registry(&self) -> &UploadRegistry {
        &self.registry
    }

    /// Spawns the worker and its supervisor. Non-blocking; callers
    /// follow with `await_result`.
    pub fn start(self: &Arc<Self>) {
        {
            let mut shared = self.shared.lock().unwrap();
            if shared.started_at.is_some() {
                error!(media_id = %self.media_id, "start called twice");
                return;
            }
            shared.started_at = Some(Instant::now());
            shared.started_at_utc = Some(Utc::now());
        }
        info!(media_id = %self.media_id, "upload starting");

        let worker = self.clone();
        tokio::spawn(async move { worker.run().await });
        tokio::spawn(supervise(self.clone()));
    }

    /// Cancels the upload, from any task or thread, at any time.
    ///
    /// The cause is recorded exactly once: later kills keep the first
    /// cause. Firing the token drops the in-flight request, which
    /// closes the body pipe the writer is blocked on. Idempotent, and
    /// a no-op on a terminated task.
    pub fn kill(&self, is_timeout: bool) {
        {
            let mut shared = self.shared.lock().unwrap();
            if shared.state == TaskState::Terminated {
                debug!(media_id = %self.media_id, "kill on a terminated upload ignored");
                return;
            }
            if shared.cancel_cause.is_none() {
                let cause = if is_timeout {
                    let since_start = shared.started_at.map(|t| t.elapsed()).unwrap_or_default();
                    CancelCause::Stalled { since_start }
                } else {
                    CancelCause::User
                };
                warn!(media_id = %self.media_id, %cause, "killing upload");
                shared.cancel_cause = Some(cause);
            }
        }
        self.cancel.cancel();
    }

    /// Awaits the single terminal outcome.
    ///
    /// The outcome is delivered exactly once; a second call reports a
    /// logic error instead of hanging on a consumed channel.
    pub async fn await_result(&self) -> UploadOutcome {
        let rx = self.result_rx.lock().unwrap().take();
        let Some(rx) = rx else {
            error!(media_id = %self.media_id, "await_result called twice");
            return UploadOutcome::Failed {
                error: UploadError::Logic("result already consumed".to_string()),
                cancel_cause: None,
            };
        };
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(media_id = %self.media_id, "worker dropped without delivering an outcome");
                UploadOutcome::Failed {
                    error: UploadError::Logic("upload worker vanished".to_string()),
                    cancel_cause: None,
                }
            }
        }
    }

    async fn run(self: Arc<Self>) {
        // A kill that landed before the worker ran terminates the
        // upload with no network I/O at all.
        if self.cancel.is_cancelled() || self.is_killed() {
            self.finish(None).await;
            return;
        }
        let natural = self.execute().await;
        self.finish(natural).await;
    }

    /// Runs the request to a natural conclusion. `None` means the
    /// request was torn down by cancellation before a reply landed.
    async fn execute(self: &Arc<Self>) -> Option<Result<ApiResponse, UploadError>> {
        self.advance_state(TaskState::Connecting);

        let attachment_len = self
            .params
            .iter()
            .find_map(|p| p.as_attachment())
            .map(|a| a.len())
            .unwrap_or(0);
        let content_length = compute_multipart_length(&self.params, BOUNDARY);

        let (reader, writer) = tokio::io::duplex(BODY_PIPE_CAPACITY);
        let writer_task = self.spawn_body_writer(writer, attachment_len);
        self.advance_state(TaskState::HeadersSent);

        let send = self.client.send_multipart(
            &self.client.config().upload_path,
            BOUNDARY,
            content_length,
            reader,
        );

        // The cancel arm wins ties; dropping `send` when the select
        // returns is what tears the connection and the pipe down.
        let reply = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            reply = send => Some(reply),
        };
        let Some(reply) = reply else {
            debug!(media_id = %self.media_id, "request dropped by cancellation");
            let _ = writer_task.await;
            return None;
        };

        let reply = match reply {
            Ok(reply) => reply,
            Err(transport_err) => {
                // A pipe writer that failed for its own reasons is the
                // root cause; a broken pipe is just the teardown
                // symptom of the transport failure.
                let error = match writer_task.await {
                    Ok(Err(err)) if err.kind() != io::ErrorKind::BrokenPipe => {
                        UploadError::Network(format!("body streaming failed: {err}"))
                    }
                    Err(join_err) => {
                        UploadError::Logic(format!("body writer panicked: {join_err}"))
                    }
                    _ => transport_err.into(),
                };
                return Some(Err(error));
            }
        };

        let _ = writer_task.await;
        self.advance_state(TaskState::ParsingResponse);
        self.report_progress(PROGRESS_PARSING);

        if !reply.is_success() {
            return Some(Err(UploadError::Protocol {
                status: reply.status,
                status_text: reply.status_text,
                body: reply.body,
            }));
        }
        if self.is_killed() {
            // Cancellation won the race against the reply.
            debug!(media_id = %self.media_id, "2xx reply discarded after kill");
            return None;
        }
        match decode_response(reply.body.trim()) {
            Ok(response) => Some(Ok(response)),
            Err(err) => Some(Err(UploadError::Decode(err.to_string()))),
        }
    }

    /// Streams the multipart body into the pipe on its own task, so
    /// the request dispatch and the body production run concurrently.
    fn spawn_body_writer(
        self: &Arc<Self>,
        mut sink: DuplexStream,
        attachment_len: u64,
    ) -> JoinHandle<Result<u64, io::Error>> {
        let task = self.clone();
        let params = self.params.clone();
        tokio::spawn(async move {
            task.advance_state(TaskState::StreamingBody);
            task.report_progress(1);

            let mut streamed: u64 = 0;
            let result = write_multipart_body(&params, BOUNDARY, &mut sink, |delta| {
                streamed += delta;
                if attachment_len > 0 {
                    let fraction = (PROGRESS_STREAM_LIMIT as u64 * streamed / attachment_len)
                        .min(PROGRESS_STREAM_LIMIT as u64);
                    task.report_progress(fraction as u16);
                }
            })
            .await;

            match result {
                Ok(written) => {
                    // Close the pipe exactly once so the transport sees
                    // the end of the body.
                    sink.shutdown().await?;
                    task.advance_state(TaskState::AwaitingResponse);
                    task.report_progress(PROGRESS_AWAITING);
                    Ok(written)
                }
                Err(err) => {
                    debug!(media_id = %task.media_id, %err, "body writer stopped");
                    Err(err)
                }
            }
        })
    }

    /// Composes and delivers the terminal outcome, exactly once.
    async fn finish(self: &Arc<Self>, natural: Option<Result<ApiResponse, UploadError>>) {
        let (outcome, outcome_tx) = {
            let mut shared = self.shared.lock().unwrap();
            if shared.state == TaskState::Terminated {
                error!(media_id = %self.media_id, "terminal outcome delivered twice");
                return;
            }
            shared.state = TaskState::Terminated;
            shared.completed_at = Some(Utc::now());
            shared.last_progress = PROGRESS_DONE;

            let cause = shared.cancel_cause.clone();
            let outcome = match (natural, cause) {
                // Cancellation wins the race against a success.
                (Some(Ok(_)), Some(cause)) => UploadOutcome::Cancelled(cause),
                (Some(Ok(response)), None) => UploadOutcome::Success(response),
                // A cause that raced with an error is chained, not
                // discarded.
                (Some(Err(error)), cause) => UploadOutcome::Failed {
                    error,
                    cancel_cause: cause,
                },
                (None, Some(cause)) => UploadOutcome::Cancelled(cause),
                (None, None) => UploadOutcome::Failed {
                    error: UploadError::Logic("worker produced no outcome".to_string()),
                    cancel_cause: None,
                },
            };
            (outcome, shared.outcome_tx.take())
        };

        info!(
            media_id = %self.media_id,
            success = outcome.is_success(),
            cancelled = outcome.is_cancelled(),
            "upload terminated"
        );
        self.registry.unregister(&self.media_id, self);

        // Terminal progress is never lossy.
        let _ = self
            .events_tx
            .send(UploadEvent {
                media_id: self.media_id.clone(),
                progress: PROGRESS_DONE,
            })
            .await;

        match outcome_tx {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    debug!(media_id = %self.media_id, "no caller awaiting the outcome");
                }
            }
            None => error!(media_id = %self.media_id, "outcome channel already consumed"),
        }
    }

    /// Reports `value` if it increases the last reported progress.
    /// Intermediate reports are lossy; a full event channel drops the
    /// tick rather than stalling the worker.
    pub(crate) fn report_progress(&self, value: u16) {
        {
            let mut shared = self.shared.lock().unwrap();
            if value <= shared.last_progress {
                return;
            }
            shared.last_progress = value;
        }
        let _ = self.events_tx.try_send(UploadEvent {
            media_id: self.media_id.clone(),
            progress: value,
        });
    }

    /// Forward-only state transitions; a stale transition is ignored.
    fn advance_state(&self, next: TaskState) {
        let mut shared = self.shared.lock().unwrap();
        if next <= shared.state {
            return;
        }
        debug!(media_id = %self.media_id, state = ?next, "upload state");
        shared.state = next;
    }
}
