//! HTTP control surface.
//!
//! | Route | Action |
//! |---|---|
//! | `POST /sessions` | join a room over RTP: `{session_id, rtp_remote}` |
//! | `DELETE /sessions/{id}` | leave the room |
//! | `POST /sessions/{id}/play` | play `{source_url, volume?, track_name? \| track_id?}`, reply with the outcome |
//! | `POST /sessions/{id}/stop` | stop the current playback |
//! | `POST /sessions/{id}/tracks/{name}/audio` | write raw PCM16 to a track |
//! | `GET /sessions/{id}/audio` | stream room audio (PCM16 LE, 16kHz mono) |
//! | `GET /health` | session counts |

use std::convert::Infallible;
use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, PlaybackError};
use crate::network::RtpRoom;
use crate::pipeline::{PlaybackOutcome, PlaybackRequest};
use crate::service::BridgeService;
use crate::track::{track_name_for_id, Room};

#[derive(Debug, Deserialize)]
struct OpenSessionBody {
    session_id: String,
    rtp_remote: SocketAddr,
}

#[derive(Debug, Serialize)]
struct OpenSessionReply {
    session_id: String,
    rtp_local: SocketAddr,
}

#[derive(Debug, Deserialize)]
struct PlayBody {
    source_url: String,
    #[serde(default)]
    volume: Option<f32>,
    #[serde(default)]
    track_name: Option<String>,
    #[serde(default)]
    track_id: Option<i32>,
}

impl PlayBody {
    // ---
    fn into_request(self) -> PlaybackRequest {
        // ---
        let track_name = match (self.track_name, self.track_id) {
            (Some(name), _) if !name.is_empty() => name,
            (_, Some(id)) => track_name_for_id(id),
            _ => String::new(),
        };

        PlaybackRequest::new(self.source_url)
            .with_volume(self.volume.unwrap_or(1.0))
            .with_track(track_name)
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum PlayReply {
    Completed { duration_ms: i64, samples: u64 },
    Cancelled { duration_ms: i64, samples: u64 },
    Failed { kind: &'static str, error: String },
}

impl From<PlaybackOutcome> for PlayReply {
    fn from(outcome: PlaybackOutcome) -> Self {
        match outcome {
            PlaybackOutcome::Completed(r) => PlayReply::Completed {
                duration_ms: r.elapsed_millis,
                samples: r.samples,
            },
            PlaybackOutcome::Cancelled(r) => PlayReply::Cancelled {
                duration_ms: r.elapsed_millis,
                samples: r.samples,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct StopReply {
    stopped: bool,
}

#[derive(Debug, Serialize)]
struct PushReply {
    samples: usize,
}

#[derive(Debug, Serialize)]
struct ErrorReply {
    error: String,
}

/// Serves the control API on `listener` until `shutdown` resolves.
///
/// # Errors
///
/// Returns error if the listener cannot be handed to the runtime or the
/// server fails.
pub async fn serve<F>(service: Arc<BridgeService>, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    // ---
    listener
        .set_nonblocking(true)
        .context("failed to make control listener non-blocking")?;
    let local = listener.local_addr().context("listener has no address")?;

    let make_svc = make_service_fn(move |_conn| {
        let service = Arc::clone(&service);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let service = Arc::clone(&service);
                async move { Ok::<_, Infallible>(route(service, req).await) }
            }))
        }
    });

    info!("Control API listening on http://{}", local);
    Server::from_tcp(listener)
        .context("failed to start control server")?
        .serve(make_svc)
        .with_graceful_shutdown(shutdown)
        .await
        .context("control server failed")?;

    info!("Control API stopped");
    Ok(())
}

async fn route(service: Arc<BridgeService>, req: Request<Body>) -> Response<Body> {
    // ---
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    debug!("{} {}", method, path);

    match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => json(StatusCode::OK, &service.health()),
        (&Method::POST, ["sessions"]) => open_session(&service, req).await,
        (&Method::DELETE, ["sessions", id]) => match service.close_session(id) {
            Ok(()) => empty(StatusCode::NO_CONTENT),
            Err(e) => bridge_error(&e),
        },
        (&Method::POST, ["sessions", id, "play"]) => play(&service, id, req).await,
        (&Method::POST, ["sessions", id, "stop"]) => match service.stop_playback(id) {
            Ok(stopped) => json(StatusCode::OK, &StopReply { stopped }),
            Err(e) => bridge_error(&e),
        },
        (&Method::POST, ["sessions", id, "tracks", track, "audio"]) => {
            push_audio(&service, id, track, req).await
        }
        (&Method::GET, ["sessions", id, "audio"]) => room_audio(&service, id),
        _ => error(StatusCode::NOT_FOUND, format!("no route for {method} {path}")),
    }
}

async fn open_session(service: &BridgeService, req: Request<Body>) -> Response<Body> {
    // ---
    let body: OpenSessionBody = match read_json(req).await {
        Ok(body) => body,
        Err(resp) => return resp,
    };

    let room = match RtpRoom::connect(body.rtp_remote).await {
        Ok(room) => Arc::new(room),
        Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    };
    let rtp_local = match room.local_addr() {
        Ok(addr) => addr,
        Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    };

    match service.open_session(&body.session_id, room.clone()) {
        Ok(session) => {
            room.spawn_receiver(session.room_audio());
            json(
                StatusCode::CREATED,
                &OpenSessionReply {
                    session_id: body.session_id,
                    rtp_local,
                },
            )
        }
        Err(e) => {
            room.disconnect();
            bridge_error(&e)
        }
    }
}

async fn play(service: &BridgeService, session_id: &str, req: Request<Body>) -> Response<Body> {
    // ---
    let body: PlayBody = match read_json(req).await {
        Ok(body) => body,
        Err(resp) => return resp,
    };

    match service.play(session_id, body.into_request()).await {
        Ok(outcome) => json(StatusCode::OK, &PlayReply::from(outcome)),
        Err(BridgeError::Playback(e)) => {
            let status = match e {
                PlaybackError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::BAD_GATEWAY,
            };
            json(
                status,
                &PlayReply::Failed {
                    kind: e.kind(),
                    error: e.to_string(),
                },
            )
        }
        Err(e) => bridge_error(&e),
    }
}

async fn push_audio(
    service: &BridgeService,
    session_id: &str,
    track: &str,
    req: Request<Body>,
) -> Response<Body> {
    // ---
    let pcm = match hyper::body::to_bytes(req.into_body()).await {
        Ok(pcm) => pcm,
        Err(e) => return error(StatusCode::BAD_REQUEST, format!("failed to read body: {e}")),
    };

    match service.push_audio(session_id, track, &pcm).await {
        Ok(samples) => json(StatusCode::OK, &PushReply { samples }),
        Err(e) => bridge_error(&e),
    }
}

fn room_audio(service: &BridgeService, session_id: &str) -> Response<Body> {
    // ---
    let rx = match service.take_room_audio(session_id) {
        Ok(Some(rx)) => rx,
        Ok(None) => {
            return error(
                StatusCode::CONFLICT,
                format!("room audio of session {session_id} is already being streamed"),
            )
        }
        Err(e) => return bridge_error(&e),
    };

    // Ends when the session closes and its senders are gone
    let chunks = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    });

    let mut resp = Response::new(Body::wrap_stream(chunks));
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    resp
}

async fn read_json<T: serde::de::DeserializeOwned>(req: Request<Body>) -> Result<T, Response<Body>> {
    // ---
    let bytes = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| error(StatusCode::BAD_REQUEST, format!("failed to read body: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")))
}

fn bridge_error(err: &BridgeError) -> Response<Body> {
    // ---
    let status = match err {
        BridgeError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        BridgeError::SessionExists(_) => StatusCode::CONFLICT,
        BridgeError::Playback(PlaybackError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
        BridgeError::Playback(_) | BridgeError::Delivery(_) => StatusCode::BAD_GATEWAY,
        BridgeError::HttpClient(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!("{}", err);
    }
    error(status, err.to_string())
}

fn error(status: StatusCode, message: String) -> Response<Body> {
    // ---
    json(status, &ErrorReply { error: message })
}

fn empty(status: StatusCode) -> Response<Body> {
    // ---
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = status;
    resp
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    // ---
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(e) => {
            let mut resp = Response::new(Body::from(format!("encode error: {e}")));
            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return resp;
        }
    };

    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}
