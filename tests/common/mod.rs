#![allow(dead_code)]

use std::{
    collections::VecDeque,
    io,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use mineguard_fleet::{
    config::{EventPayload, InstanceEvent, ServerConfig},
    error::ProbeError,
    probe::{PlayerCounts, ProbeRequest, ProbeResponse, ProbeSet, ProtocolProbe},
    Environment, ProtocolKind,
};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_stream::{StreamExt, wrappers::BroadcastStream};

pub const EVENT_WAIT: Duration = Duration::from_secs(5);

pub fn online_response() -> ProbeResponse {
    ProbeResponse {
        players: Some(PlayerCounts {
            online: 1,
            max: 20,
            sample: Vec::new(),
        }),
        motd: Some("A Minecraft Server".to_string()),
        version: Some("1.21.4".to_string()),
        protocol_version: Some(769),
        latency: None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Online,
    Refused,
    Hang,
}

/// Answers probes from a script, repeating the last step once it runs out.
pub struct ScriptedProbe {
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        let script: VecDeque<Step> = steps.into_iter().collect();
        let last = script.front().copied().unwrap_or(Step::Refused);
        Arc::new(Self {
            script: Mutex::new(script),
            last: Mutex::new(last),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut last = self.last.lock().unwrap();
        if let Some(step) = self.script.lock().unwrap().pop_front() {
            *last = step;
        }
        *last
    }
}

#[async_trait]
impl ProtocolProbe for ScriptedProbe {
    async fn probe(&self, _request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Online => Ok(online_response()),
            Step::Refused => Err(ProbeError::Io(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            ))),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProbeError::Timeout)
            }
        }
    }
}

/// Online iff a TCP connection to the target succeeds.
pub struct TcpProbe;

#[async_trait]
impl ProtocolProbe for TcpProbe {
    async fn probe(&self, request: &ProbeRequest) -> Result<ProbeResponse, ProbeError> {
        tokio::net::TcpStream::connect((request.host.as_str(), request.port)).await?;
        Ok(online_response())
    }
}

pub fn probe_set<P: ProtocolProbe + 'static>(probe: Arc<P>) -> ProbeSet {
    ProbeSet::new(probe.clone(), probe)
}

pub fn server_config(id: &str, command: &str) -> ServerConfig {
    ServerConfig {
        id: id.to_string(),
        name: format!("Server {id}"),
        directory: PathBuf::from("."),
        command: command.to_string(),
        persist: false,
        env: Environment::default(),
        protocol: ProtocolKind::Java,
        address: "127.0.0.1:25565".to_string(),
        ping_interval: 60_000,
    }
}

pub async fn next_event(stream: &mut BroadcastStream<InstanceEvent>) -> InstanceEvent {
    tokio::time::timeout(EVENT_WAIT, stream.next())
        .await
        .expect("event before timeout")
        .expect("stream open")
        .expect("receiver kept up")
}

pub async fn next_line(stream: &mut BroadcastStream<InstanceEvent>) -> String {
    loop {
        if let EventPayload::StdLine { line } = next_event(stream).await.payload {
            return line.msg().to_string();
        }
    }
}

/// Everything already queued on the stream, without waiting for more.
pub async fn drain(stream: &mut BroadcastStream<InstanceEvent>) -> Vec<EventPayload> {
    let mut payloads = Vec::new();
    while let Ok(Some(Ok(event))) =
        tokio::time::timeout(Duration::from_millis(100), stream.next()).await
    {
        payloads.push(event.payload);
    }
    payloads
}

pub const PAYLOAD: &[u8] = b"not really a jar, but it will do for a cache";

pub const PAPER_VERSION: &str = "1.21.4";

pub fn payload_sha256() -> String {
    hex::encode(Sha256::digest(PAYLOAD))
}

struct Fixture {
    base: String,
    downloads: AtomicUsize,
}

/// Local HTTP server standing in for artifact hosts and the Paper API.
pub struct FileServer {
    pub addr: SocketAddr,
    fixture: Arc<Fixture>,
    _task: JoinHandle<()>,
}

impl FileServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let fixture = Arc::new(Fixture {
            base: format!("http://{addr}"),
            downloads: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/files/server.jar", get(serve_payload))
            .route("/download", get(serve_attachment))
            .route("/missing.jar", get(|| async { StatusCode::NOT_FOUND }))
            .route("/v3/projects/paper", get(paper_versions))
            .route(
                "/v3/projects/paper/versions/1.21.4/builds",
                get(paper_builds),
            )
            .with_state(fixture.clone());

        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            fixture,
            _task: task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.fixture.base, path)
    }

    /// Number of artifact bodies served so far.
    pub fn downloads(&self) -> usize {
        self.fixture.downloads.load(Ordering::SeqCst)
    }
}

async fn serve_payload(State(fixture): State<Arc<Fixture>>) -> impl IntoResponse {
    fixture.downloads.fetch_add(1, Ordering::SeqCst);
    PAYLOAD
}

async fn serve_attachment(State(fixture): State<Arc<Fixture>>) -> impl IntoResponse {
    fixture.downloads.fetch_add(1, Ordering::SeqCst);
    (
        [(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"named-by-header.jar\"",
        )],
        PAYLOAD,
    )
}

async fn paper_versions() -> impl IntoResponse {
    Json(json!({
        "project": { "id": "paper", "name": "Paper" },
        "versions": {
            "1.21": [PAPER_VERSION, "1.21.3"],
            "1.20": ["1.20.6"]
        }
    }))
}

async fn paper_builds(State(fixture): State<Arc<Fixture>>) -> impl IntoResponse {
    Json(json!([
        {
            "id": 231,
            "time": "2025-01-10T12:00:00Z",
            "channel": "STABLE",
            "commits": [
                { "sha": "abc123", "time": "2025-01-10T11:00:00Z", "message": "Fix things" }
            ],
            "downloads": {
                "server:default": {
                    "name": "paper-1.21.4-231.jar",
                    "checksums": { "sha256": payload_sha256() },
                    "size": PAYLOAD.len(),
                    "url": format!("{}/files/server.jar", fixture.base)
                }
            }
        },
        {
            "id": 230,
            "time": "2025-01-09T12:00:00Z",
            "channel": "STABLE",
            "downloads": {}
        }
    ]))
}
