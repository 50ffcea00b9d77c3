//! WebSocket transport for streaming sessions.
//!
//! One task per connection owns the full ingestion pipeline: a `select!`
//! loop over inbound frames, completed inference outcomes, and a timer tick
//! that drives the partial cadence and liveness checks. Inference itself
//! never runs here; the loop only submits jobs and forwards outcomes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::{AudioConfig, ServerConfig};
use crate::engine::dispatcher::{InferenceDispatcher, JobKind, JobOutcome};
use crate::engine::{SpeechRecognizer, VoiceDetectorFactory};
use crate::error::ProtocolError;
use crate::manager::SessionManager;
use crate::protocol::{now_timestamp, ClientMessage, ServerMessage, SessionConfig};
use crate::session::{SessionEngine, SessionId};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub dispatcher: Arc<InferenceDispatcher>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub vad_factory: Arc<dyn VoiceDetectorFactory>,
    pub server: ServerConfig,
    pub audio: AudioConfig,
}

pub fn router(state: AppState) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let session_id = match state.manager.register() {
        Ok(id) => id,
        Err(err) => {
            // Explicit rejection, never a silent drop.
            let msg = ServerMessage::Error {
                message: err.to_string(),
                code: 503,
            };
            if let Ok(json) = serde_json::to_string(&msg) {
                let _ = socket.send(Message::Text(json.into())).await;
            }
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    run_session(socket, &state, session_id).await;

    // Registry entry goes first so a late-completing job finds the session
    // already gone; then queued dispatcher work is dropped.
    state.manager.deregister(session_id);
    state.dispatcher.remove_session(session_id);
}

async fn run_session(socket: WebSocket, state: &AppState, session_id: SessionId) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Dedicated writer so result delivery never contends with ingestion.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(err) => {
                    error!("failed to serialize outbound message: {}", err);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let _ = out_tx.send(ServerMessage::Status {
        message: "connected".to_string(),
        model_loaded: state.recognizer.model_loaded(),
    });

    let (job_tx, mut job_rx) = mpsc::unbounded_channel::<JobOutcome>();
    let mut engine = SessionEngine::new(&state.audio, state.vad_factory.create());

    let mut tick = tokio::time::interval(TICK_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut liveness = Liveness::new(Instant::now());
    let mut closing = false;

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                let frame = match inbound {
                    Some(Ok(frame)) => frame,
                    Some(Err(err)) => {
                        debug!("session {} transport error: {}", session_id, err);
                        break;
                    }
                    None => break,
                };
                liveness.on_frame(Instant::now());

                match frame {
                    Message::Binary(data) => {
                        liveness.on_audio(Instant::now());
                        if closing {
                            debug!("session {} ignoring audio after done", session_id);
                            continue;
                        }
                        handle_audio(
                            session_id,
                            &data,
                            &mut engine,
                            state,
                            &out_tx,
                            &job_tx,
                        );
                    }
                    Message::Text(text) => {
                        match handle_control(session_id, text.as_str(), &mut engine, state, &out_tx, &job_tx) {
                            ControlFlow::Continue => {}
                            ControlFlow::PongReceived => liveness.on_pong(),
                            ControlFlow::Done => {
                                closing = true;
                                if state.dispatcher.pending(session_id) == 0 {
                                    break;
                                }
                            }
                        }
                    }
                    Message::Pong(_) => liveness.on_pong(),
                    Message::Ping(_) => {} // transport answers automatically
                    Message::Close(_) => break,
                }
            }

            outcome = job_rx.recv() => {
                // job_tx is held by this task, so recv can't return None here.
                if let Some(outcome) = outcome {
                    deliver_outcome(outcome, &out_tx);
                }
                if closing && state.dispatcher.pending(session_id) == 0 {
                    break;
                }
            }

            _ = tick.tick() => {
                let now = Instant::now();
                for request in engine.on_tick(now) {
                    state.dispatcher.submit(session_id, request, job_tx.clone());
                }
                if closing && state.dispatcher.pending(session_id) == 0 {
                    break;
                }

                match liveness.check(now, &state.server) {
                    LivenessCheck::Fine => {}
                    LivenessCheck::SendPing => {
                        let _ = out_tx.send(ServerMessage::Ping);
                    }
                    LivenessCheck::IdleClose => {
                        info!("session {} received no audio, closing", session_id);
                        let _ = out_tx.send(ServerMessage::Timeout {
                            message: "session idle, closing".to_string(),
                            timestamp: now_timestamp(),
                        });
                        break;
                    }
                    LivenessCheck::PongOverdue => {
                        info!("session {} failed liveness probe, closing", session_id);
                        break;
                    }
                }
            }
        }
    }

    drop(out_tx);
    let _ = writer.await;
    info!("session {} closed", session_id);
}

enum ControlFlow {
    Continue,
    PongReceived,
    Done,
}

/// Per-connection liveness bookkeeping. Pings fire after general frame
/// inactivity, but idle close keys on audio alone: a client that answers
/// every ping without ever streaming audio is still reaped.
struct Liveness {
    last_frame: Instant,
    last_audio: Instant,
    pinged_at: Option<Instant>,
}

#[derive(Debug, PartialEq, Eq)]
enum LivenessCheck {
    Fine,
    SendPing,
    IdleClose,
    PongOverdue,
}

impl Liveness {
    fn new(now: Instant) -> Self {
        Self {
            last_frame: now,
            last_audio: now,
            pinged_at: None,
        }
    }

    fn on_frame(&mut self, now: Instant) {
        self.last_frame = now;
    }

    fn on_audio(&mut self, now: Instant) {
        self.last_audio = now;
        self.pinged_at = None;
    }

    fn on_pong(&mut self) {
        self.pinged_at = None;
    }

    fn check(&mut self, now: Instant, cfg: &ServerConfig) -> LivenessCheck {
        if now.duration_since(self.last_audio) >= cfg.idle_timeout() {
            return LivenessCheck::IdleClose;
        }
        match self.pinged_at {
            Some(at) => {
                if now.duration_since(at) >= cfg.pong_timeout() {
                    LivenessCheck::PongOverdue
                } else {
                    LivenessCheck::Fine
                }
            }
            None => {
                if now.duration_since(self.last_frame) >= cfg.ping_interval() {
                    self.pinged_at = Some(now);
                    LivenessCheck::SendPing
                } else {
                    LivenessCheck::Fine
                }
            }
        }
    }
}

fn handle_audio(
    session_id: SessionId,
    data: &[u8],
    engine: &mut SessionEngine,
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<ServerMessage>,
    job_tx: &mpsc::UnboundedSender<JobOutcome>,
) {
    if data.len() % 4 != 0 {
        let err = ProtocolError::MisalignedFrame(data.len());
        warn!("session {}: {}", session_id, err);
        let _ = out_tx.send(ServerMessage::Error {
            message: err.to_string(),
            code: err.code(),
        });
        return;
    }

    let samples: Vec<f32> = data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    if samples.is_empty() {
        return;
    }

    for request in engine.on_audio(&samples, Instant::now()) {
        state.dispatcher.submit(session_id, request, job_tx.clone());
    }
}

fn handle_control(
    session_id: SessionId,
    text: &str,
    engine: &mut SessionEngine,
    state: &AppState,
    out_tx: &mpsc::UnboundedSender<ServerMessage>,
    job_tx: &mpsc::UnboundedSender<JobOutcome>,
) -> ControlFlow {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Config { language, use_itn }) => {
            state
                .manager
                .set_config(session_id, SessionConfig { language, use_itn });
            ControlFlow::Continue
        }
        Ok(ClientMessage::Done) => {
            debug!("session {} end of stream", session_id);
            if let Some(request) = engine.flush() {
                state.dispatcher.submit(session_id, request, job_tx.clone());
            }
            ControlFlow::Done
        }
        Ok(ClientMessage::Pong) => ControlFlow::PongReceived,
        Ok(ClientMessage::Heartbeat) | Ok(ClientMessage::Status) => ControlFlow::Continue,
        Err(err) => {
            // Protocol error: report and carry on, the session survives.
            let err = ProtocolError::BadControlMessage(err.to_string());
            warn!("session {}: {}", session_id, err);
            let _ = out_tx.send(ServerMessage::Error {
                message: err.to_string(),
                code: err.code(),
            });
            ControlFlow::Continue
        }
    }
}

/// Convert a completed job into wire messages. Finals are always emitted so
/// segment ids stay gapless; empty partials are suppressed. A failed job
/// reports an error scoped to itself and the session continues.
fn deliver_outcome(outcome: JobOutcome, out_tx: &mpsc::UnboundedSender<ServerMessage>) {
    match outcome.result {
        Ok(transcription) => match outcome.kind {
            JobKind::Partial => {
                if !transcription.text.is_empty() {
                    let _ = out_tx.send(ServerMessage::Partial {
                        text: transcription.text,
                        timestamp: now_timestamp(),
                        confidence: transcription.confidence,
                    });
                }
            }
            JobKind::Final => {
                let _ = out_tx.send(ServerMessage::Final {
                    text: transcription.text,
                    timestamp: now_timestamp(),
                    confidence: transcription.confidence,
                    segment_id: outcome.segment_id.unwrap_or(0),
                });
            }
        },
        Err(err) => {
            let _ = out_tx.send(ServerMessage::Error {
                message: err.to_string(),
                code: 500,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::energy_vad::EnergyVadFactory;
    use crate::engine::StubRecognizer;

    fn test_state() -> AppState {
        let recognizer: Arc<dyn SpeechRecognizer> = Arc::new(StubRecognizer);
        let audio = AudioConfig::default();
        AppState {
            manager: Arc::new(SessionManager::new(4)),
            dispatcher: InferenceDispatcher::new(Arc::clone(&recognizer), 2),
            recognizer,
            vad_factory: Arc::new(EnergyVadFactory::new(audio.vad_threshold)),
            server: ServerConfig::default(),
            audio,
        }
    }

    /// Well-formed binary frame loud enough for the energy detector.
    fn loud_frame(samples: usize) -> Vec<u8> {
        std::iter::repeat(0.3f32)
            .take(samples)
            .flat_map(f32::to_le_bytes)
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_control_reports_error_and_session_continues() {
        let state = test_state();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (job_tx, _job_rx) = mpsc::unbounded_channel();
        let mut engine = SessionEngine::new(&state.audio, state.vad_factory.create());

        let flow = handle_control(1, r#"{"type":"reboot"}"#, &mut engine, &state, &out_tx, &job_tx);
        assert!(matches!(flow, ControlFlow::Continue));
        match out_rx.try_recv().expect("expected an error message") {
            ServerMessage::Error { code, .. } => assert_eq!(code, 400),
            other => panic!("unexpected message: {:?}", other),
        }

        // Audio after the bad message is still processed.
        handle_audio(1, &loud_frame(1024), &mut engine, &state, &out_tx, &job_tx);
        assert!(engine.is_speaking());
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn misaligned_frame_reports_error_and_audio_resumes() {
        let state = test_state();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (job_tx, _job_rx) = mpsc::unbounded_channel();
        let mut engine = SessionEngine::new(&state.audio, state.vad_factory.create());

        handle_audio(1, &[0u8; 7], &mut engine, &state, &out_tx, &job_tx);
        match out_rx.try_recv().expect("expected an error message") {
            ServerMessage::Error { code, .. } => assert_eq!(code, 400),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(!engine.is_speaking());

        handle_audio(1, &loud_frame(1024), &mut engine, &state, &out_tx, &job_tx);
        assert!(engine.is_speaking());
        assert!(out_rx.try_recv().is_err());
    }

    #[test]
    fn answered_pings_do_not_defer_idle_close() {
        let cfg = ServerConfig::default();
        let base = Instant::now();
        let mut liveness = Liveness::new(base);

        // The client answers every ping but never sends audio.
        let mut t = base;
        loop {
            t += Duration::from_secs(10);
            match liveness.check(t, &cfg) {
                LivenessCheck::Fine => {}
                LivenessCheck::SendPing => {
                    liveness.on_frame(t + Duration::from_secs(1));
                    liveness.on_pong();
                }
                LivenessCheck::IdleClose => break,
                LivenessCheck::PongOverdue => panic!("pongs were answered"),
            }
            assert!(
                t <= base + cfg.idle_timeout() + Duration::from_secs(10),
                "idle close never fired"
            );
        }
        assert!(t >= base + cfg.idle_timeout());
    }

    #[test]
    fn audio_defers_idle_close() {
        let cfg = ServerConfig::default();
        let base = Instant::now();
        let mut liveness = Liveness::new(base);

        liveness.on_frame(base + Duration::from_secs(299));
        liveness.on_audio(base + Duration::from_secs(299));
        assert_eq!(
            liveness.check(base + Duration::from_secs(300), &cfg),
            LivenessCheck::Fine
        );
    }

    #[test]
    fn unanswered_ping_is_overdue() {
        let cfg = ServerConfig::default();
        let base = Instant::now();
        let mut liveness = Liveness::new(base);

        assert_eq!(
            liveness.check(base + cfg.ping_interval(), &cfg),
            LivenessCheck::SendPing
        );
        let pinged = base + cfg.ping_interval();
        assert_eq!(
            liveness.check(pinged + Duration::from_secs(5), &cfg),
            LivenessCheck::Fine
        );
        assert_eq!(
            liveness.check(pinged + cfg.pong_timeout(), &cfg),
            LivenessCheck::PongOverdue
        );
    }

    #[test]
    fn answered_ping_rearms() {
        let cfg = ServerConfig::default();
        let base = Instant::now();
        let mut liveness = Liveness::new(base);

        assert_eq!(
            liveness.check(base + cfg.ping_interval(), &cfg),
            LivenessCheck::SendPing
        );
        let answered = base + cfg.ping_interval() + Duration::from_secs(2);
        liveness.on_frame(answered);
        liveness.on_pong();

        assert_eq!(
            liveness.check(answered + Duration::from_secs(20), &cfg),
            LivenessCheck::Fine
        );
        assert_eq!(
            liveness.check(answered + cfg.ping_interval(), &cfg),
            LivenessCheck::SendPing
        );
    }
}
