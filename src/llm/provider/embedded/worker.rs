//! The embedded model worker
//!
//! A dedicated OS thread owns the backend (and therefore the model) for its
//! whole life. The host talks to it only through [`WorkerRequest`] and
//! [`WorkerEvent`] messages; an abort is just another request, picked up
//! between tokens.

use std::ops::ControlFlow;
use std::thread;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

use super::backend::InferenceBackend;
use super::protocol::{WorkerEvent, WorkerRequest};
use crate::core::Result;

/// Channels connected to a running worker
pub struct WorkerChannels {
    pub requests: UnboundedSender<WorkerRequest>,
    pub events: UnboundedReceiver<WorkerEvent>,
}

/// Start a worker thread that owns `backend`
///
/// The thread exits when every request sender has been dropped.
pub fn spawn_worker(backend: Box<dyn InferenceBackend>) -> Result<WorkerChannels> {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    thread::Builder::new()
        .name("quillmind-embedded".to_string())
        .spawn(move || run(backend, request_rx, event_tx))?;

    Ok(WorkerChannels {
        requests: request_tx,
        events: event_rx,
    })
}

fn run(
    mut backend: Box<dyn InferenceBackend>,
    mut requests: UnboundedReceiver<WorkerRequest>,
    events: UnboundedSender<WorkerEvent>,
) {
    let mut loaded: Option<String> = None;

    while let Some(request) = requests.blocking_recv() {
        match request {
            WorkerRequest::Init { model_id } => {
                if loaded.as_deref() == Some(model_id.as_str()) {
                    let _ = events.send(WorkerEvent::Ready { model_id });
                    continue;
                }

                tracing::info!(model = %model_id, "Loading embedded model");
                let mut report = |progress: f32, text: &str| {
                    let _ = events.send(WorkerEvent::Progress {
                        progress,
                        text: text.to_string(),
                    });
                };

                match backend.load(&model_id, &mut report) {
                    Ok(()) => {
                        loaded = Some(model_id.clone());
                        let _ = events.send(WorkerEvent::Ready { model_id });
                    }
                    Err(e) => {
                        loaded = None;
                        tracing::warn!(model = %model_id, error = %e, "Embedded model failed to load");
                        let _ = events.send(WorkerEvent::Error {
                            request_id: None,
                            message: e.to_string(),
                        });
                    }
                }
            }

            WorkerRequest::Chat {
                request_id,
                messages,
            } => {
                if loaded.is_none() {
                    let _ = events.send(WorkerEvent::Error {
                        request_id: Some(request_id),
                        message: "no model loaded".to_string(),
                    });
                    continue;
                }

                let mut aborted = false;
                let result = backend.generate(&messages, &mut |token: &str| {
                    let _ = events.send(WorkerEvent::Token {
                        request_id,
                        text: token.to_string(),
                    });

                    match poll_abort(&mut requests, &events) {
                        PollAbort::Abort => {
                            aborted = true;
                            ControlFlow::Break(())
                        }
                        PollAbort::Continue => ControlFlow::Continue(()),
                    }
                });

                let event = match result {
                    Ok(()) => WorkerEvent::Complete { request_id },
                    Err(_) if aborted => WorkerEvent::Complete { request_id },
                    Err(e) => WorkerEvent::Error {
                        request_id: Some(request_id),
                        message: e.to_string(),
                    },
                };
                let _ = events.send(event);
            }

            // Nothing is running between generations
            WorkerRequest::Abort => {}
        }
    }

    tracing::debug!("Embedded worker stopped");
}

enum PollAbort {
    Abort,
    Continue,
}

/// Drain requests that arrived mid-generation; only an abort matters
fn poll_abort(
    requests: &mut UnboundedReceiver<WorkerRequest>,
    events: &UnboundedSender<WorkerEvent>,
) -> PollAbort {
    loop {
        match requests.try_recv() {
            Ok(WorkerRequest::Abort) => return PollAbort::Abort,
            Ok(WorkerRequest::Chat { request_id, .. }) => {
                let _ = events.send(WorkerEvent::Error {
                    request_id: Some(request_id),
                    message: "a generation is already running".to_string(),
                });
            }
            Ok(other) => {
                tracing::warn!(request = ?other, "Dropping request received during generation");
            }
            Err(TryRecvError::Empty) => return PollAbort::Continue,
            Err(TryRecvError::Disconnected) => return PollAbort::Abort,
        }
    }
}
