//! HTTP surface for the control-plane process: accepts job submissions and
//! serves status queries. Runs in its own process so a slow or stuck HTTP
//! handler can never stall the scheduler's tick loop — it only ever talks
//! to the scheduler through the command queue (write-only) and the mailbox
//! (read-only, via `peek`, so status requests never race the writer or
//! consume the snapshot out from under it).

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::sync::Arc;
use stoplight::job::Job;
use stoplight::mailbox::Mailbox;
use stoplight::manifest::JobManifest;
use stoplight::queue::{Command, CommandQueue};
use tokio::sync::Mutex;

#[derive(Clone)]
struct ServerState {
    queue: Arc<CommandQueue>,
    mailbox: Arc<Mutex<Mailbox>>,
}

#[derive(Deserialize)]
struct AddJobForm {
    job_dir: Option<String>,
}

pub async fn run(config: stoplight::config::Config, queue: CommandQueue, mailbox: Mailbox) -> anyhow::Result<()> {
    let state = ServerState { queue: Arc::new(queue), mailbox: Arc::new(Mutex::new(mailbox)) };

    let app = Router::new()
        .route("/add_job", post(add_job))
        .route("/status", get(status))
        .with_state(state);

    let host = &config.daemon.host;
    let port = config.daemon.port;
    let bind_addr = format!("{host}:{port}");
    let addr = tokio::net::lookup_host(&bind_addr)
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("failed to resolve address: {bind_addr}"))?;

    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener: std::net::TcpListener = socket.into();
    std_listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(std_listener)?;

    tracing::info!(%addr, "control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    tracing::info!("control plane shutdown complete");
    Ok(())
}

async fn create_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM, initiating graceful shutdown"),
        _ = sigint.recv() => tracing::info!("received SIGINT, initiating graceful shutdown"),
    }
}

/// `POST /add_job`. Decodes `job_dir`, parses the manifest synchronously,
/// and on success hands the scheduler a fully decoded [`Job`] over the
/// command queue — never a bare path, so the scheduler process never has
/// to touch `job.yaml` itself.
async fn add_job(
    State(state): State<ServerState>,
    axum::Form(form): axum::Form<AddJobForm>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let Some(job_dir) = form.job_dir.filter(|s| !s.is_empty()) else {
        tracing::error!("invalid request with no job_dir parameter");
        return Err(StatusCode::BAD_REQUEST);
    };
    let job_dir = std::path::PathBuf::from(job_dir);

    match JobManifest::decode(&job_dir) {
        Ok(manifest) => {
            let job = Job::new(job_dir, manifest);
            tracing::info!(job = job.name(), "received job submission");
            if let Err(e) = state.queue.push(&Command::AddJob { job }) {
                tracing::error!(error = %e, "failed to enqueue job");
                return Ok(Json(serde_json::json!({"status": "error", "details": e.to_string()})));
            }
            Ok(Json(serde_json::json!({"status": "okay"})))
        }
        Err(e) => {
            tracing::warn!(error = %e, job_dir = %job_dir.display(), "rejected job submission");
            Ok(Json(serde_json::json!({"status": "error", "details": e.to_string()})))
        }
    }
}

/// `GET /status`. Always a `peek` — never consumes the snapshot, so
/// concurrent status requests (and the scheduler's next `set`) are
/// unaffected by how many times this handler runs.
async fn status(State(state): State<ServerState>) -> Json<serde_json::Value> {
    let mut mailbox = state.mailbox.lock().await;
    match mailbox.peek() {
        Ok(Some(bytes)) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(mut snapshot) => {
                if let Some(obj) = snapshot.as_object_mut() {
                    obj.insert("status".to_string(), serde_json::json!("okay"));
                }
                Json(snapshot)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to decode mailbox snapshot");
                Json(serde_json::json!({"status": "error", "details": "No status available yet."}))
            }
        },
        Ok(None) => Json(serde_json::json!({"status": "error", "details": "No status available yet."})),
        Err(e) => {
            tracing::error!(error = %e, "failed to read mailbox");
            Json(serde_json::json!({"status": "error", "details": "No status available yet."}))
        }
    }
}
