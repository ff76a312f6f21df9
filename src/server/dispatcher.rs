//! The dispatcher: one [`Connection`] per duplex byte stream.
//!
//! # Architecture
//!
//! ```text
//!  bytes ──► reader task ──(bounded channel)──► dispatch loop ──┬─► correlation table
//!            FrameReader                         classify       ├─► request handlers (concurrent tasks)
//!                                                lifecycle      └─► notification worker (sequential)
//!                                                                        │
//!  bytes ◄── FrameWriter (mutex) ◄── Peer ◄──────────────────────────────┘
//! ```
//!
//! Request handlers never block the loop, so a handler suspended on its own
//! outbound request still sees the response arrive. Notifications go through
//! a bounded queue; when it is full the loop stops reading until the worker
//! catches up. Each request handler runs on its own task so a panic is
//! caught as a `JoinError` and answered with `InternalError`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::lsp::capabilities::InitializeResult;
use crate::lsp::catalog::{self, methods, MessageKind};
use crate::lsp::lifecycle::{ConnectionState, Lifecycle, NotificationAdmission, RequestAdmission};
use crate::rpc::correlation::CorrelationTable;
use crate::rpc::error::{ConnectionError, FramingError, HandlerError, ResponseError};
use crate::rpc::framing::{Frame, FrameReader};
use crate::rpc::message::{classify, Envelope, Notification, Request, RequestId, Response};

use super::config::ConnectionConfig;
use super::peer::Peer;
use super::registry::{HandlerRegistry, NotificationHandler};

type BoxedReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// How a connection ended without a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The peer closed the stream on a frame boundary.
    StreamClosed,
    /// An `exit` notification was processed. `clean` is true when
    /// `shutdown` was accepted first.
    Exited { clean: bool },
}

impl ConnectionOutcome {
    /// Conventional process exit code: 0 only after shutdown + exit.
    pub fn exit_code(self) -> i32 {
        match self {
            ConnectionOutcome::Exited { clean: true } => 0,
            _ => 1,
        }
    }
}

/// One JSON-RPC connection over a duplex byte stream.
///
/// Owns all per-connection state: lifecycle phase, id counter, pending
/// request table. Nothing is process-global, so connections can coexist.
pub struct Connection {
    reader: BoxedReader,
    peer: Peer,
    registry: Arc<HandlerRegistry>,
    lifecycle: Arc<Lifecycle>,
    table: Arc<CorrelationTable>,
    config: ConnectionConfig,
}

impl Connection {
    /// Build a connection over raw read/write halves.
    pub fn new<R, W>(reader: R, writer: W, registry: HandlerRegistry, config: ConnectionConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let table = Arc::new(CorrelationTable::new());
        let lifecycle = Arc::new(Lifecycle::new());
        let peer = Peer::new(
            Box::new(writer),
            Arc::clone(&table),
            Arc::clone(&lifecycle),
            config.request_timeout,
        );

        Self {
            reader: Box::new(BufReader::new(reader)),
            peer,
            registry: Arc::new(registry),
            lifecycle,
            table,
            config,
        }
    }

    /// Handle for issuing requests and notifications on this connection.
    pub fn peer(&self) -> Peer {
        self.peer.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    /// Drive the connection until the peer exits, the stream closes, or a
    /// fatal fault occurs.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Framing` if the inbound stream cannot be framed
    /// - `ConnectionError::Write` if an outbound frame cannot be written
    ///
    /// In both cases the write half is closed and every pending outbound
    /// request completes with `RpcError::ConnectionClosed`.
    pub async fn serve(self) -> Result<ConnectionOutcome, ConnectionError> {
        let Connection {
            reader,
            peer,
            registry,
            lifecycle,
            table,
            config,
        } = self;

        info!("Serving connection {}", config.name);

        let (frames_tx, frames_rx) = mpsc::channel(config.inbound_queue_depth.max(1));
        let frame_reader = FrameReader::new(reader).with_max_content_length(config.max_content_length);
        let reader_task = tokio::spawn(read_frames(frame_reader, frames_tx));

        let (notify_tx, notify_rx) = mpsc::channel(config.inbound_queue_depth.max(1));
        let notification_worker = tokio::spawn(run_notifications(notify_rx, peer.clone()));

        let mut dispatcher = Dispatcher {
            registry,
            peer: peer.clone(),
            lifecycle: Arc::clone(&lifecycle),
            table: Arc::clone(&table),
            config,
            requests: JoinSet::new(),
            notifications: Some(notify_tx),
            notification_worker,
        };

        let result = dispatcher.run(frames_rx).await;
        reader_task.abort();

        match &result {
            Ok(ConnectionOutcome::StreamClosed) => dispatcher.drain().await,
            Ok(ConnectionOutcome::Exited { clean }) => {
                info!("Peer sent exit (clean: {})", clean);
                dispatcher.abort_all();
            }
            Err(e) => {
                error!("Connection terminated: {}", e);
                dispatcher.abort_all();
            }
        }

        let orphaned = table.orphan_all();
        if orphaned > 0 {
            debug!("Orphaned {} pending outbound requests", orphaned);
        }
        lifecycle.terminate();
        peer.close().await;

        result
    }
}

/// Reader task: decode frames in receipt order and hand them to the loop.
async fn read_frames(
    mut reader: FrameReader<BoxedReader>,
    frames: mpsc::Sender<Result<Frame, FramingError>>,
) {
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                if frames.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = frames.send(Err(e)).await;
                return;
            }
        }
    }
}

struct QueuedNotification {
    method: String,
    params: Option<Value>,
    handler: Arc<dyn NotificationHandler>,
}

/// Notification worker: runs handlers one at a time, in receipt order.
async fn run_notifications(mut queue: mpsc::Receiver<QueuedNotification>, peer: Peer) {
    while let Some(job) = queue.recv().await {
        let task = AbortOnDrop(tokio::spawn(job.handler.call(job.params, peer.clone())));
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Notification handler for {} failed: {}", job.method, e),
            Err(e) => warn!("Notification handler for {} panicked: {}", job.method, e),
        }
    }
}

/// Aborts the wrapped task when dropped, so aborting the outer task also
/// stops the handler it is waiting on.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

/// Which lifecycle bookkeeping a finished request needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestRole {
    Initialize,
    Shutdown,
    Ordinary,
}

struct Completed {
    id: RequestId,
    method: String,
    role: RequestRole,
    outcome: Result<Result<Value, HandlerError>, JoinError>,
}

struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    peer: Peer,
    lifecycle: Arc<Lifecycle>,
    table: Arc<CorrelationTable>,
    config: ConnectionConfig,
    requests: JoinSet<Completed>,
    notifications: Option<mpsc::Sender<QueuedNotification>>,
    notification_worker: JoinHandle<()>,
}

impl Dispatcher {
    async fn run(
        &mut self,
        mut frames: mpsc::Receiver<Result<Frame, FramingError>>,
    ) -> Result<ConnectionOutcome, ConnectionError> {
        loop {
            tokio::select! {
                frame = frames.recv() => match frame {
                    Some(Ok(frame)) => {
                        if let Some(outcome) = self.handle_frame(frame).await? {
                            return Ok(outcome);
                        }
                    }
                    Some(Err(e)) => return Err(ConnectionError::Framing(e)),
                    None => {
                        info!("Peer closed the stream");
                        return Ok(ConnectionOutcome::StreamClosed);
                    }
                },
                Some(joined) = self.requests.join_next(), if !self.requests.is_empty() => {
                    self.finish_request(joined).await?;
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<Option<ConnectionOutcome>, ConnectionError> {
        let value = match frame {
            Frame::Json(value) => value,
            Frame::Unparsable(reason) => {
                // No id can be recovered from unparsable content.
                warn!("Dropping unparsable message: {}", reason);
                return Ok(None);
            }
        };

        match classify(value) {
            Ok(Envelope::Request(request)) => self.handle_request(request).await?,
            Ok(Envelope::Response(response)) => self.handle_response(response),
            Ok(Envelope::Notification(notification)) => {
                return Ok(self.handle_notification(notification).await);
            }
            Err(malformed) => match malformed.id.clone() {
                Some(id) if !self.lifecycle.is_exited() => {
                    warn!("Invalid message: {}", malformed);
                    self.respond(Response::error(
                        id,
                        ResponseError::invalid_request(malformed.reason),
                    ))
                    .await?;
                }
                _ => warn!("Dropping invalid message: {}", malformed),
            },
        }

        Ok(None)
    }

    async fn handle_request(&mut self, request: Request) -> Result<(), ConnectionError> {
        debug!("Request {} (id {})", request.method, request.id);

        match self.lifecycle.admit_request(&request.method) {
            RequestAdmission::Drop => {
                debug!("Connection exited; dropping request {}", request.id);
            }
            RequestAdmission::Reject(reason) => {
                warn!(
                    "Rejecting {} in state {}: {}",
                    request.method,
                    self.lifecycle.state(),
                    reason
                );
                let error = ResponseError::new(self.config.lifecycle_violation_code, reason);
                self.respond(Response::error(request.id, error)).await?;
            }
            RequestAdmission::Initialize => match self.registry.request_handler(methods::INITIALIZE) {
                Some(_) => self.spawn_request(request, RequestRole::Initialize),
                None => {
                    let encoded =
                        InitializeResult::new(self.registry.capabilities().clone()).to_value();
                    self.lifecycle.initialize_finished(encoded.is_ok());
                    let response = match encoded {
                        Ok(result) => Response::success(request.id, result),
                        Err(e) => {
                            error!("Failed to encode capabilities: {}", e);
                            Response::error(
                                request.id,
                                ResponseError::internal(format!("Failed to encode capabilities: {}", e)),
                            )
                        }
                    };
                    self.respond(response).await?;
                }
            },
            RequestAdmission::Shutdown => match self.registry.request_handler(methods::SHUTDOWN) {
                Some(_) => self.spawn_request(request, RequestRole::Shutdown),
                None => {
                    self.respond(Response::success(request.id, Value::Null))
                        .await?;
                }
            },
            RequestAdmission::Dispatch => {
                if self.registry.request_handler(&request.method).is_some() {
                    if !self.registry.capabilities().advertises(&request.method) {
                        debug!("{} was not advertised; dispatching anyway", request.method);
                    }
                    self.spawn_request(request, RequestRole::Ordinary);
                } else {
                    match catalog::lookup(&request.method) {
                        Some(spec) if spec.kind != MessageKind::Request => {
                            warn!("{} is a notification but arrived as a request", request.method);
                        }
                        Some(_) => debug!("No handler for {}", request.method),
                        None => debug!("No handler for unknown method {}", request.method),
                    }
                    let error = ResponseError::method_not_found(&request.method);
                    self.respond(Response::error(request.id, error)).await?;
                }
            }
        }

        Ok(())
    }

    fn spawn_request(&mut self, request: Request, role: RequestRole) {
        let Some(handler) = self.registry.request_handler(&request.method) else {
            return;
        };
        let Request { id, method, params } = request;
        let handler_task = AbortOnDrop(tokio::spawn(handler.call(params, self.peer.clone())));

        self.requests.spawn(async move {
            Completed {
                id,
                method,
                role,
                outcome: handler_task.await,
            }
        });
    }

    async fn finish_request(&mut self, joined: Result<Completed, JoinError>) -> Result<(), ConnectionError> {
        let completed = match joined {
            Ok(completed) => completed,
            Err(e) => {
                error!("Request task failed: {}", e);
                return Ok(());
            }
        };

        let result = match completed.outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!("Handler for {} failed: {}", completed.method, e);
                Err(e.into_response_error())
            }
            Err(e) if e.is_panic() => {
                error!("Handler for {} panicked", completed.method);
                Err(ResponseError::internal(format!(
                    "Handler for {} panicked",
                    completed.method
                )))
            }
            Err(_) => Err(ResponseError::internal(format!(
                "Handler for {} was cancelled",
                completed.method
            ))),
        };

        let result = match completed.role {
            RequestRole::Initialize => {
                self.lifecycle.initialize_finished(result.is_ok());
                result
            }
            RequestRole::Shutdown => result.map(|_| Value::Null),
            RequestRole::Ordinary => result,
        };

        let response = match result {
            Ok(value) => Response::success(completed.id, value),
            Err(error) => Response::error(completed.id, error),
        };
        self.respond(response).await
    }

    fn handle_response(&self, response: Response) {
        let id = response.id.clone();
        if !self.table.resolve(&id, response.outcome.into_result()) {
            debug!("Dropping response for unknown request {}", id);
        }
    }

    /// Queue a notification for the worker.
    ///
    /// The queue is bounded; while it is full the dispatch loop waits here,
    /// which stops the reader and pushes back on the peer.
    async fn handle_notification(&mut self, notification: Notification) -> Option<ConnectionOutcome> {
        debug!("Notification {}", notification.method);

        match self.lifecycle.admit_notification(&notification.method) {
            NotificationAdmission::Exit => Some(ConnectionOutcome::Exited {
                clean: self.lifecycle.shutdown_received(),
            }),
            NotificationAdmission::Drop => None,
            NotificationAdmission::Ignore => {
                debug!(
                    "Ignoring {} in state {}",
                    notification.method,
                    self.lifecycle.state()
                );
                None
            }
            NotificationAdmission::Dispatch => {
                let Some(handler) = self.registry.notification_handler(&notification.method) else {
                    debug!("No handler for notification {}", notification.method);
                    return None;
                };
                if let Some(queue) = &self.notifications {
                    let job = QueuedNotification {
                        method: notification.method,
                        params: notification.params,
                        handler,
                    };
                    if queue.send(job).await.is_err() {
                        warn!("Notification worker stopped; dropping notification");
                    }
                }
                None
            }
        }
    }

    /// Write a response unless the connection has exited.
    async fn respond(&self, response: Response) -> Result<(), ConnectionError> {
        if self.lifecycle.is_exited() {
            debug!("Connection exited; not sending response {}", response.id);
            return Ok(());
        }
        self.peer
            .send(&Envelope::Response(response))
            .await
            .map_err(ConnectionError::Write)
    }

    /// Let in-flight handlers finish after the peer closed its side.
    ///
    /// No more responses can arrive, so pending outbound requests are
    /// orphaned first to unblock handlers waiting on them.
    async fn drain(&mut self) {
        self.table.orphan_all();
        self.notifications = None;

        let limit = self.config.drain_timeout;
        let drained = tokio::time::timeout(limit, async {
            while let Some(joined) = self.requests.join_next().await {
                if let Err(e) = self.finish_request(joined).await {
                    warn!("Could not deliver response while draining: {}", e);
                    break;
                }
            }
            if let Err(e) = (&mut self.notification_worker).await {
                if e.is_panic() {
                    warn!("Notification worker panicked");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("In-flight handlers did not finish within {:?}", limit);
            self.abort_all();
        }
    }

    fn abort_all(&mut self) {
        self.requests.abort_all();
        self.notifications = None;
        self.notification_worker.abort();
    }
}
