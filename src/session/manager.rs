//! Generation Session Manager
//!
//! Owns the lifecycle of generation requests against sets of table cells:
//! validation and admission, transport open with retry, strictly ordered
//! frame processing, cancellation, and the final commit or atomic revert.

use super::backend::{GenerationBackend, GenerationRequest};
use super::config::SessionConfig;
use super::state::{GenerationSession, SessionReport, SessionState, SessionStats, TerminalTracker};
use super::transport::Transport;
use crate::aggregate::CellAggregator;
use crate::error::ApiError;
use crate::prompt::build_cell_prompt;
use crate::protocol::{classify, classify_body, Event, FrameDecoder};
use crate::table::{CellChange, CellUpdate, Subscription, TableRegistry, TableStore};
use crate::types::{CellAddress, SessionId, TableId};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

type SessionMap = Arc<RwLock<HashMap<SessionId, Arc<SessionControl>>>>;

/// Malformed-frame diagnostics kept per session; later ones are only counted.
const MAX_DIAGNOSTICS: usize = 32;

/// A request to generate a set of cells of one table
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRequest {
    pub table_id: TableId,
    pub targets: Vec<CellAddress>,
    pub streaming: bool,
}

impl SessionRequest {
    pub fn new(table_id: impl Into<TableId>, targets: Vec<CellAddress>, streaming: bool) -> Self {
        Self {
            table_id: table_id.into(),
            targets,
            streaming,
        }
    }

    /// Target every `rows × columns` cell.
    pub fn cross<R, C>(
        table_id: impl Into<TableId>,
        rows: &[R],
        columns: &[C],
        streaming: bool,
    ) -> Self
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        let targets = rows
            .iter()
            .flat_map(|row| {
                columns
                    .iter()
                    .map(move |column| CellAddress::new(row.as_ref(), column.as_ref()))
            })
            .collect();
        Self::new(table_id, targets, streaming)
    }
}

/// Shared control block for one session
struct SessionControl {
    id: SessionId,
    table_id: TableId,
    session: Mutex<GenerationSession>,
    store: Arc<TableStore>,
    stats: Mutex<SessionStats>,
    cancelled: AtomicBool,
    cancel: Notify,
    report: watch::Sender<Option<SessionReport>>,
    sessions: SessionMap,
}

impl SessionControl {
    fn state(&self) -> SessionState {
        self.session.lock().state.clone()
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut session = self.session.lock();
        let previous = session.state.name();
        if !session.transition(next) {
            return false;
        }
        info!(
            session_id = %self.id,
            table_id = %self.table_id,
            from = previous,
            to = session.state.name(),
            "Session state changed"
        );
        true
    }

    /// Resolves once cancellation has been requested.
    async fn cancelled(&self) {
        if self.cancelled.load(Ordering::SeqCst) {
            return;
        }
        // notify_one keeps a permit, so a cancel that lands first is not lost.
        self.cancel.notified().await;
    }

    fn cancel(&self) {
        if self.state().is_terminal() {
            debug!(session_id = %self.id, "Cancel ignored; session already finished");
            return;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.notify_one();
        self.finish(SessionState::Cancelled);
    }

    /// Move to a terminal state, then commit or revert the store. Only the
    /// first caller wins; later calls return `false`.
    fn finish(&self, outcome: SessionState) -> bool {
        if !outcome.is_terminal() || !self.transition(outcome.clone()) {
            return false;
        }

        let reverted = match &outcome {
            SessionState::Completed => {
                if let Err(e) = self.store.commit(self.id) {
                    error!(session_id = %self.id, error = %e, "Failed to commit session");
                }
                Vec::new()
            }
            _ => match self.store.revert(self.id) {
                Ok(cells) => cells,
                Err(e) => {
                    error!(session_id = %self.id, error = %e, "Failed to revert session");
                    Vec::new()
                }
            },
        };

        match &outcome {
            SessionState::Completed => {
                info!(session_id = %self.id, table_id = %self.table_id, "Session completed")
            }
            SessionState::Cancelled => warn!(
                session_id = %self.id,
                reverted = reverted.len(),
                "Session cancelled"
            ),
            SessionState::Failed(e) => error!(
                session_id = %self.id,
                reverted = reverted.len(),
                error = %e,
                "Session failed"
            ),
            SessionState::Pending | SessionState::Streaming => {}
        }

        self.sessions.write().remove(&self.id);
        self.report.send_replace(Some(self.build_report(outcome, reverted)));
        true
    }

    fn build_report(&self, state: SessionState, reverted: Vec<CellAddress>) -> SessionReport {
        let stats = self.stats.lock().clone();
        SessionReport {
            session_id: self.id,
            table_id: self.table_id.clone(),
            state,
            frames: stats.frames,
            malformed_frames: stats.malformed_frames,
            skipped_events: stats.skipped_events,
            diagnostics: stats.diagnostics,
            cell_errors: stats.cell_errors,
            reverted,
        }
    }
}

/// Caller-side handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    control: Arc<SessionControl>,
    report: watch::Receiver<Option<SessionReport>>,
}

impl SessionHandle {
    fn new(control: Arc<SessionControl>) -> Self {
        let report = control.report.subscribe();
        Self { control, report }
    }

    pub fn id(&self) -> SessionId {
        self.control.id
    }

    pub fn table_id(&self) -> &str {
        &self.control.table_id
    }

    pub fn targets(&self) -> Vec<CellAddress> {
        self.control.session.lock().targets.clone()
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    /// Wait for the session to reach a terminal state.
    pub async fn wait(&self) -> SessionReport {
        let mut report = self.report.clone();
        loop {
            let current = report.borrow().clone();
            if let Some(done) = current {
                return done;
            }
            if report.changed().await.is_err() {
                break;
            }
        }
        self.control.build_report(self.control.state(), Vec::new())
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.control.id)
            .field("table_id", &self.control.table_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Starts, tracks, and cancels generation sessions
pub struct SessionManager {
    registry: Arc<TableRegistry>,
    backend: Arc<dyn GenerationBackend>,
    config: SessionConfig,
    next_id: AtomicU64,
    sessions: SessionMap,
}

impl SessionManager {
    pub fn new(
        registry: Arc<TableRegistry>,
        backend: Arc<dyn GenerationBackend>,
        config: SessionConfig,
    ) -> Self {
        Self {
            registry,
            backend,
            config,
            next_id: AtomicU64::new(1),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Validate, admit, and launch a session.
    ///
    /// Everything that can reject the request (unknown table, row or column,
    /// non-generated column, bad template, conflicting session) is checked
    /// before the backend is contacted. Admission itself is atomic with the
    /// snapshot of the targets.
    pub fn start_session(&self, request: SessionRequest) -> Result<SessionHandle, ApiError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ApiError::InvalidRequest("Sessions must be started inside a tokio runtime".to_string())
        })?;
        let store = self.registry.get(&request.table_id)?;

        let mut seen = HashSet::new();
        let targets: Vec<CellAddress> = request
            .targets
            .into_iter()
            .filter(|address| seen.insert(address.clone()))
            .collect();
        if targets.is_empty() {
            return Err(ApiError::InvalidRequest(
                "Session has no target cells".to_string(),
            ));
        }

        let columns = store.columns();
        let mut prompts = Vec::with_capacity(targets.len());
        for address in &targets {
            let column = columns
                .iter()
                .find(|c| c.id == address.column_id)
                .ok_or_else(|| ApiError::ColumnNotFound(address.column_id.clone()))?;
            if !column.is_generated() {
                return Err(ApiError::InvalidRequest(format!(
                    "Column {} has no gen_config",
                    column.id
                )));
            }
            let row = store
                .row(&address.row_id)
                .ok_or_else(|| ApiError::RowNotFound(address.row_id.clone()))?;
            prompts.push(build_cell_prompt(column, &row, &columns)?);
        }

        let id = SessionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        store.begin_streaming(id, &targets)?;
        info!(
            session_id = %id,
            table_id = %request.table_id,
            targets = targets.len(),
            streaming = request.streaming,
            "Admitted generation session"
        );

        let (report, _) = watch::channel(None);
        let control = Arc::new(SessionControl {
            id,
            table_id: request.table_id.clone(),
            session: Mutex::new(GenerationSession::new(
                id,
                request.table_id.clone(),
                targets,
                request.streaming,
            )),
            store,
            stats: Mutex::new(SessionStats::default()),
            cancelled: AtomicBool::new(false),
            cancel: Notify::new(),
            report,
            sessions: Arc::clone(&self.sessions),
        });
        self.sessions.write().insert(id, Arc::clone(&control));
        let handle = SessionHandle::new(Arc::clone(&control));

        let generation = GenerationRequest {
            session_id: id,
            table_id: request.table_id,
            stream: request.streaming,
            prompts,
        };
        runtime.spawn(drive(
            control,
            Arc::clone(&self.backend),
            self.config.clone(),
            generation,
        ));
        Ok(handle)
    }

    /// Abort a session and revert all of its targets. Idempotent, and a no-op
    /// for sessions that already finished.
    pub fn cancel_session(&self, handle: &SessionHandle) {
        handle.control.cancel();
    }

    /// Handle for an in-flight session.
    pub fn session(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions
            .read()
            .get(&id)
            .map(|control| SessionHandle::new(Arc::clone(control)))
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Subscribe to one cell of a registered table.
    pub fn subscribe(
        &self,
        table_id: &str,
        address: CellAddress,
        callback: impl Fn(&CellUpdate) + Send + Sync + 'static,
    ) -> Result<Subscription, ApiError> {
        Ok(self.registry.get(table_id)?.subscribe(address, callback))
    }
}

async fn drive(
    control: Arc<SessionControl>,
    backend: Arc<dyn GenerationBackend>,
    config: SessionConfig,
    request: GenerationRequest,
) {
    let outcome = tokio::select! {
        biased;
        _ = control.cancelled() => {
            debug!(session_id = %control.id, "Stopped session task after cancel");
            return;
        }
        outcome = run(&control, backend.as_ref(), &config, &request) => outcome,
    };
    control.finish(outcome);
}

async fn run(
    control: &SessionControl,
    backend: &dyn GenerationBackend,
    config: &SessionConfig,
    request: &GenerationRequest,
) -> SessionState {
    let mut transport = match open_transport(control.id, backend, config, request).await {
        Ok(transport) => transport,
        Err(e) => return SessionState::Failed(e),
    };
    if !control.transition(SessionState::Streaming) {
        transport.close().await;
        return control.state();
    }
    let outcome = pump(control, transport.as_mut(), config, request.stream).await;
    transport.close().await;
    outcome
}

/// Open the transport, retrying retryable failures. Nothing has been read
/// yet, so a retry cannot duplicate content.
async fn open_transport(
    session_id: SessionId,
    backend: &dyn GenerationBackend,
    config: &SessionConfig,
    request: &GenerationRequest,
) -> Result<Box<dyn Transport>, ApiError> {
    let mut attempt = 0;
    loop {
        match backend.open(request).await {
            Ok(transport) => {
                debug!(session_id = %session_id, attempt = attempt + 1, "Opened transport");
                return Ok(transport);
            }
            Err(e) if e.is_retryable() && attempt < config.max_open_retries => {
                attempt += 1;
                warn!(
                    session_id = %session_id,
                    attempt,
                    max_retries = config.max_open_retries,
                    error = %e,
                    "Transport open failed, retrying"
                );
                sleep(config.retry_delay()).await;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Transport open failed");
                return Err(e);
            }
        }
    }
}

async fn pump(
    control: &SessionControl,
    transport: &mut dyn Transport,
    config: &SessionConfig,
    streaming: bool,
) -> SessionState {
    let targets = control.session.lock().targets.clone();
    let mut events = EventSink {
        control,
        tracker: TerminalTracker::new(&targets),
        aggregator: CellAggregator::new(control.id, Arc::clone(&control.store), targets),
        max_malformed: config.max_malformed_frames,
    };
    let mut decoder = FrameDecoder::with_limit(config.max_frame_bytes);
    let mut body: Vec<u8> = Vec::new();

    loop {
        let next = match config.idle_timeout() {
            Some(limit) => match timeout(limit, transport.next_chunk()).await {
                Ok(next) => next,
                Err(_) => {
                    return SessionState::Failed(ApiError::TransportError(format!(
                        "No data received for {} ms",
                        limit.as_millis()
                    )))
                }
            },
            None => transport.next_chunk().await,
        };
        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => return SessionState::Failed(e),
            None => break,
        };
        debug!(session_id = %control.id, bytes = bytes.len(), "Received chunk");

        if !streaming {
            // The whole body is one frame and shares its size limit.
            if body.len() + bytes.len() > config.max_frame_bytes {
                return SessionState::Failed(ApiError::TransportError(format!(
                    "Response body exceeded {} bytes",
                    config.max_frame_bytes
                )));
            }
            body.extend_from_slice(&bytes);
            continue;
        }
        for frame in decoder.feed(&bytes) {
            if let Some(outcome) = events.handle(&classify(&frame)) {
                return outcome;
            }
        }
    }

    if streaming {
        for frame in decoder.finish() {
            if let Some(outcome) = events.handle(&classify(&frame)) {
                return outcome;
            }
        }
    } else {
        let text = String::from_utf8_lossy(&body);
        for event in classify_body(&text) {
            if let Some(outcome) = events.handle(&event) {
                return outcome;
            }
        }
    }

    SessionState::Failed(ApiError::TransportError(
        "stream ended before completion".to_string(),
    ))
}

/// Applies classified events in arrival order and decides when the session ends
struct EventSink<'a> {
    control: &'a SessionControl,
    tracker: TerminalTracker,
    aggregator: CellAggregator,
    max_malformed: usize,
}

impl EventSink<'_> {
    /// Process one event; `Some` carries the session's final state.
    fn handle(&mut self, event: &Event) -> Option<SessionState> {
        self.control.stats.lock().frames += 1;

        match event {
            Event::Malformed(frame) => {
                let count = {
                    let mut stats = self.control.stats.lock();
                    if frame.error.is_unparseable() {
                        stats.malformed_frames += 1;
                    } else {
                        stats.skipped_events += 1;
                    }
                    if stats.diagnostics.len() < MAX_DIAGNOSTICS {
                        stats.diagnostics.push(frame.error.clone());
                    }
                    stats.malformed_frames
                };
                self.aggregator.ingest(event);
                if frame.error.is_unparseable() && count > self.max_malformed {
                    return Some(SessionState::Failed(ApiError::TransportError(format!(
                        "{} malformed frames exceeded the limit of {}",
                        count, self.max_malformed
                    ))));
                }
            }
            Event::DoneSentinel => {
                if !self.tracker.mark_all() {
                    debug!(session_id = %self.control.id, "Ignored repeated [DONE]");
                }
            }
            _ => {
                if let Some(delta) = self.aggregator.ingest(event) {
                    if let CellChange::Error(err) = &delta.change {
                        warn!(
                            session_id = %self.control.id,
                            address = %delta.address,
                            error = %err.message,
                            "Backend reported an error for cell"
                        );
                        self.control
                            .stats
                            .lock()
                            .cell_errors
                            .push((delta.address.clone(), err.clone()));
                    }
                    if delta.terminal {
                        self.tracker.mark(&delta.address);
                    }
                }
            }
        }

        if self.tracker.is_complete() {
            Some(SessionState::Completed)
        } else {
            None
        }
    }
}
