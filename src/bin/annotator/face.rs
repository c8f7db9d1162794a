use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use task_annotator::{ActionKind, StatusView};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

/// Operator requests, handled one at a time by the engine loop.
#[derive(Debug)]
pub enum Command {
    Launch { url: String },
    StartTask { description: String },
    Record { kind: ActionKind, value: Option<String> },
    PrimarySelected,
    SecondarySelected,
    StopBrowser,
}

#[derive(Clone, Copy, Debug)]
pub enum Level {
    Info,
    Warning,
    Error,
}

/// Events streamed to the console via SSE.
#[derive(Clone, Debug)]
pub enum ConsoleEvent {
    Log { level: Level, message: String },
    Status(StatusView),
}

impl ConsoleEvent {
    fn to_sse_event(&self) -> Event {
        match self {
            ConsoleEvent::Log { level, message } => {
                let level = match level {
                    Level::Info => "info",
                    Level::Warning => "warning",
                    Level::Error => "error",
                };
                let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
                Event::default().event("log").data(
                    json!({ "level": level, "message": format!("[{stamp}] {message}") })
                        .to_string(),
                )
            }
            ConsoleEvent::Status(view) => Event::default()
                .event("status")
                .data(serde_json::to_string(view).unwrap_or_else(|_| "{}".into())),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub cmd_tx: mpsc::Sender<Command>,
    pub event_tx: broadcast::Sender<ConsoleEvent>,
    pub status_rx: watch::Receiver<StatusView>,
    pub default_url: String,
}

#[derive(Deserialize)]
struct LaunchPayload {
    url: String,
}

#[derive(Deserialize)]
struct TaskPayload {
    description: String,
}

#[derive(Deserialize)]
struct ActionPayload {
    kind: ActionKind,
    #[serde(default)]
    value: Option<String>,
}

/// Bind the first free port in `port..port + 10`.
pub async fn bind(port: u16) -> anyhow::Result<(TcpListener, u16)> {
    for p in port..port.saturating_add(10) {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", p)).await {
            return Ok((listener, p));
        }
    }
    anyhow::bail!(
        "could not bind to any port {}-{}; is another annotator running?",
        port,
        port.saturating_add(9)
    )
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/events", get(sse_handler))
        .route("/api/status", get(status_handler))
        .route("/api/launch", post(launch_handler))
        .route("/api/task", post(task_handler))
        .route("/api/action", post(action_handler))
        .route("/api/shutdown-browser", post(shutdown_handler))
        .route("/api/notify-primary-selected", get(primary_handler))
        .route("/api/notify-secondary-selected", get(secondary_handler))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state)
}

/// Serve the console until the process exits.
pub fn serve(listener: TcpListener, state: Arc<AppState>) {
    let app = router(state);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "console server stopped");
        }
    });
}

async fn send(state: &AppState, command: Command) -> StatusCode {
    debug!(?command, "console command");
    match state.cmd_tx.send(command).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    info!("console opened");
    let url = state
        .default_url
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;");
    Html(INDEX_HTML.replace("__DEFAULT_URL__", &url))
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusView> {
    Json(state.status_rx.borrow().clone())
}

async fn launch_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LaunchPayload>,
) -> StatusCode {
    send(&state, Command::Launch { url: payload.url }).await
}

async fn task_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TaskPayload>,
) -> StatusCode {
    send(
        &state,
        Command::StartTask {
            description: payload.description,
        },
    )
    .await
}

async fn action_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ActionPayload>,
) -> StatusCode {
    send(
        &state,
        Command::Record {
            kind: payload.kind,
            value: payload.value,
        },
    )
    .await
}

async fn shutdown_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    send(&state, Command::StopBrowser).await
}

async fn primary_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    send(&state, Command::PrimarySelected).await;
    Json(json!({ "status": "success" }))
}

async fn secondary_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    send(&state, Command::SecondarySelected).await;
    Json(json!({ "status": "success" }))
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let initial = ConsoleEvent::Status(state.status_rx.borrow().clone()).to_sse_event();
    let stream = tokio_stream::once(Ok(initial)).chain(BroadcastStream::new(rx).filter_map(
        |result: Result<ConsoleEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        },
    ));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Task Annotator</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body {
    background: #f3f4f6;
    color: #111827;
    font-family: 'Segoe UI', system-ui, -apple-system, sans-serif;
    padding: 8px;
    display: flex;
    flex-direction: column;
    gap: 8px;
    height: 100vh;
  }
  .row { display: flex; gap: 6px; align-items: flex-start; }
  input, textarea, select { flex: 1; padding: 6px 8px; border: 1px solid #d1d5db; border-radius: 6px; font: inherit; }
  textarea { resize: vertical; }
  button { padding: 6px 12px; border: 0; border-radius: 6px; color: #fff; background: #2563eb; cursor: pointer; }
  button:disabled { background: #9ca3af; cursor: default; }
  #start { background: #16a34a; }
  #start.stop { background: #dc2626; }
  #record { background: #7c3aed; width: 100%; }
  #locked { font-size: 13px; color: #374151; min-height: 18px; }
  #log {
    flex: 1; overflow-y: auto; background: #111827; color: #e5e7eb;
    font-family: ui-monospace, monospace; font-size: 12px; padding: 8px; border-radius: 6px;
  }
  #log .warning { color: #fbbf24; }
  #log .error { color: #f87171; }
  #status { background: #e5e7eb; padding: 6px 8px; border-radius: 6px; font-size: 13px; }
</style>
</head>
<body>
  <div class="row">
    <input id="url" value="__DEFAULT_URL__" placeholder="Website URL">
    <button id="launch">Launch</button>
    <button id="close" disabled>Close</button>
  </div>
  <div class="row">
    <textarea id="task" rows="2" placeholder="Task description, e.g. search for product X" disabled></textarea>
    <button id="start" disabled>Start</button>
  </div>
  <div id="locked"></div>
  <div class="row">
    <select id="kind" disabled>
      <option value="click">click</option>
      <option value="type">type</option>
      <option value="select">select</option>
      <option value="ignore">ignore</option>
      <option value="finish">finish</option>
    </select>
  </div>
  <div class="row">
    <input id="value" list="options" placeholder="Value (if applicable)" disabled>
    <datalist id="options"></datalist>
  </div>
  <button id="record" disabled>Record Action</button>
  <div id="log"></div>
  <div id="status">Ready. Enter URL and launch the browser.</div>

<script>
const $ = (id) => document.getElementById(id);
const post = (path, body) => fetch(path, {
  method: 'POST',
  headers: { 'Content-Type': 'application/json' },
  body: JSON.stringify(body || {}),
});

const STATUS_TEXT = {
  Idle: 'Ready. Enter URL and launch the browser.',
  BrowserReady: 'Browser ready. Describe and start your task.',
  Active: 'Task in progress. Click elements in the browser and record actions.',
  Finishing: 'Finishing task...',
};

function render(s) {
  const ready = s.status === 'BrowserReady';
  const active = s.status === 'Active';
  $('launch').disabled = s.status !== 'Idle';
  $('url').disabled = s.status !== 'Idle';
  $('close').disabled = s.status === 'Idle';
  $('task').disabled = !ready;
  $('start').disabled = !(ready || active);
  $('start').textContent = active ? 'Stop' : 'Start';
  $('start').classList.toggle('stop', active);

  const locked = active && s.lockedTag;
  $('kind').disabled = !active;
  $('value').disabled = !locked;
  $('record').disabled = !active;
  $('locked').textContent = locked
    ? `Locked <${s.lockedTag}> "${s.lockedText || ''}" | actions recorded: ${s.actionCount}`
    : (active ? `No element locked | actions recorded: ${s.actionCount}` : '');
  if (locked && s.suggestedAction) $('kind').value = s.suggestedAction;
  if (locked) $('value').value = s.suggestedValue || '';
  $('options').innerHTML = '';
  for (const o of s.options || []) {
    const opt = document.createElement('option');
    opt.value = o.text;
    $('options').appendChild(opt);
  }
  $('status').textContent = locked
    ? `Element locked: <${s.lockedTag}>. Choose action/value or 'ignore'.`
    : STATUS_TEXT[s.status];
  if (ready) $('task').focus();
}

function log(entry) {
  const line = document.createElement('div');
  line.className = entry.level;
  line.textContent = entry.message;
  $('log').appendChild(line);
  $('log').scrollTop = $('log').scrollHeight;
}

$('launch').onclick = () => post('/api/launch', { url: $('url').value });
$('close').onclick = () => post('/api/shutdown-browser');
$('start').onclick = () => {
  post('/api/task', { description: $('task').value });
  if ($('start').textContent === 'Stop') $('task').value = '';
};
$('record').onclick = () => {
  const kind = $('kind').value;
  post('/api/action', { kind, value: $('value').value || null });
  if (kind === 'finish') $('task').value = '';
  $('value').value = '';
};

const events = new EventSource('/events');
events.addEventListener('status', (e) => render(JSON.parse(e.data)));
events.addEventListener('log', (e) => log(JSON.parse(e.data)));
</script>
</body>
</html>
"##;
