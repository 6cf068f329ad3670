use chrono::NaiveDate;
use rollcall_core::{
    Detection, Enrollment, EuclideanMatcher, FrameReport, LectureKey, LectureSelection,
    ScanSession, SessionSummary,
};
use rollcall_store::{Store, StoreError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no students enrolled")]
    NoIdentities,
    #[error("a scan session is already running")]
    SessionActive,
    #[error("no scan session is running")]
    NoActiveSession,
    #[error("frame aborted: {source}")]
    TickAborted {
        /// Decisions made before the failing write.
        partial: FrameReport,
        source: StoreError,
    },
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Matching parameters the engine applies to every session.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub distance_threshold: f32,
    pub process_interval: Duration,
}

/// Messages sent from the command layer to the engine thread.
enum EngineRequest {
    StartSession {
        date: NaiveDate,
        selection: LectureSelection,
        reply: oneshot::Sender<Result<LectureKey, EngineError>>,
    },
    Frame {
        offset: Option<Duration>,
        detections: Vec<Detection>,
        reply: oneshot::Sender<Result<Option<FrameReport>, EngineError>>,
    },
    EndSession {
        reply: oneshot::Sender<Result<SessionSummary, EngineError>>,
    },
    Enroll {
        enrollment: Enrollment,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Remove {
        student_id: String,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Begin a scan session on `date`. Fails if one is already running or
    /// nobody is enrolled.
    pub async fn start_session(
        &self,
        date: NaiveDate,
        selection: LectureSelection,
    ) -> Result<LectureKey, EngineError> {
        self.call(|reply| EngineRequest::StartSession {
            date,
            selection,
            reply,
        })
        .await
    }

    /// Submit one frame's detections. `Ok(None)` means the frame arrived
    /// before the next processing slot and was not matched.
    pub async fn frame(
        &self,
        offset: Option<Duration>,
        detections: Vec<Detection>,
    ) -> Result<Option<FrameReport>, EngineError> {
        self.call(|reply| EngineRequest::Frame {
            offset,
            detections,
            reply,
        })
        .await
    }

    /// Stop the running session. Any tick in progress completes first.
    pub async fn end_session(&self) -> Result<SessionSummary, EngineError> {
        self.call(|reply| EngineRequest::EndSession { reply }).await
    }

    pub async fn enroll(&self, enrollment: Enrollment) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::Enroll { enrollment, reply })
            .await
    }

    pub async fn remove(&self, student_id: String) -> Result<bool, EngineError> {
        self.call(|reply| EngineRequest::Remove { student_id, reply })
            .await
    }
}

/// A running session and the clock its frame offsets are measured on.
struct ActiveSession {
    scan: ScanSession<EuclideanMatcher>,
    started: Instant,
}

/// Spawn the engine on a dedicated OS thread that owns the store.
///
/// Requests are served one at a time, so ticks of a session never overlap
/// and ending a session always lands between two ticks.
pub fn spawn_engine(store: Store, settings: EngineSettings) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut store = store;
            let mut active: Option<ActiveSession> = None;

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::StartSession {
                        date,
                        selection,
                        reply,
                    } => {
                        let result = start_session(&store, &settings, &mut active, date, selection);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Frame {
                        offset,
                        detections,
                        reply,
                    } => {
                        let result = run_tick(&mut store, &mut active, offset, &detections);
                        let _ = reply.send(result);
                    }
                    EngineRequest::EndSession { reply } => {
                        let result = active
                            .take()
                            .map(|s| s.scan.finish())
                            .ok_or(EngineError::NoActiveSession);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll { enrollment, reply } => {
                        let result = store.enroll(&enrollment).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Remove { student_id, reply } => {
                        let result = store.remove_identity(&student_id).map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }

            if let Some(session) = active.take() {
                session.scan.finish();
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn start_session(
    store: &Store,
    settings: &EngineSettings,
    active: &mut Option<ActiveSession>,
    date: NaiveDate,
    selection: LectureSelection,
) -> Result<LectureKey, EngineError> {
    if active.is_some() {
        return Err(EngineError::SessionActive);
    }

    let snapshot = store.snapshot();
    if snapshot.is_empty() {
        return Err(EngineError::NoIdentities);
    }

    let lecture = store.resolve_lecture(date, selection)?;
    let scan = ScanSession::new(
        snapshot,
        EuclideanMatcher,
        settings.distance_threshold,
        lecture,
        settings.process_interval,
    );
    *active = Some(ActiveSession {
        scan,
        started: Instant::now(),
    });
    Ok(lecture)
}

/// Throttle, then match and record one frame.
fn run_tick(
    store: &mut Store,
    active: &mut Option<ActiveSession>,
    offset: Option<Duration>,
    detections: &[Detection],
) -> Result<Option<FrameReport>, EngineError> {
    let session = active.as_mut().ok_or(EngineError::NoActiveSession)?;
    let elapsed = offset.unwrap_or_else(|| session.started.elapsed());

    if !session.scan.admit_frame(elapsed) {
        return Ok(None);
    }

    let report = session
        .scan
        .process_frame(detections, store)
        .map_err(|aborted| EngineError::TickAborted {
            partial: aborted.partial,
            source: aborted.error,
        })?;
    tracing::debug!(
        session = %session.scan.id(),
        tick = report.tick,
        faces = report.decisions.len(),
        "frame processed"
    );
    Ok(Some(report))
}
