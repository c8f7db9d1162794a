mod face;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use dotenvy::dotenv;
use face::{AppState, Command, ConsoleEvent, Level};
use task_annotator::types::DEFAULT_URL;
use task_annotator::{
    ActionOutcome, Annotator, AnnotatorConfig, ChromeConfig, ChromeLauncher, ExecutorConfig,
    FinishReport, StartOutcome,
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Record operator-demonstrated web tasks as replayable traces.
#[derive(Parser, Debug)]
#[command(name = "annotator", version)]
struct Cli {
    /// Page to open when the browser is launched
    #[arg(long, env = "ANNOTATOR_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Launch the browser on startup instead of waiting for the console
    #[arg(long, env = "ANNOTATOR_LAUNCH")]
    launch: bool,

    /// Where task archives are written
    #[arg(long, env = "ANNOTATOR_DATA_DIR", default_value = "annotation_data")]
    data_dir: PathBuf,

    /// First port tried for the operator console
    #[arg(long, env = "ANNOTATOR_PORT", default_value_t = 3000)]
    port: u16,

    #[arg(long, env = "ANNOTATOR_HEADLESS")]
    headless: bool,

    /// Chrome executable (searched for when omitted)
    #[arg(long, env = "ANNOTATOR_CHROME")]
    chrome: Option<PathBuf>,

    /// Chrome user-data directory
    #[arg(long, env = "ANNOTATOR_PROFILE")]
    profile: Option<PathBuf>,

    #[arg(long, env = "ANNOTATOR_CLICK_TIMEOUT_MS", default_value_t = 5_000)]
    click_timeout_ms: u64,

    #[arg(long, env = "ANNOTATOR_TYPE_TIMEOUT_MS", default_value_t = 5_000)]
    type_timeout_ms: u64,

    #[arg(long, env = "ANNOTATOR_SELECT_TIMEOUT_MS", default_value_t = 10_000)]
    select_timeout_ms: u64,

    /// Pause between unlocking an element and driving it
    #[arg(long, env = "ANNOTATOR_SETTLE_MS", default_value_t = 100)]
    settle_ms: u64,
}

impl Cli {
    fn chrome_config(&self) -> ChromeConfig {
        let mut config = ChromeConfig {
            headless: self.headless,
            path: self.chrome.clone(),
            ..Default::default()
        };
        if let Some(profile) = &self.profile {
            config.user_data_dir = profile.clone();
        }
        config
    }

    fn annotator_config(&self, port: u16) -> AnnotatorConfig {
        AnnotatorConfig {
            data_dir: self.data_dir.clone(),
            notify_base: format!("http://127.0.0.1:{port}"),
            executor: ExecutorConfig {
                click_timeout: Duration::from_millis(self.click_timeout_ms),
                type_timeout: Duration::from_millis(self.type_timeout_ms),
                select_timeout: Duration::from_millis(self.select_timeout_ms),
                settle_delay: Duration::from_millis(self.settle_ms),
            },
        }
    }
}

/// Mirrors operator-facing messages into the log and the console stream.
struct Console {
    events: broadcast::Sender<ConsoleEvent>,
}

impl Console {
    fn say(&self, level: Level, message: impl Into<String>) {
        let message = message.into();
        match level {
            Level::Info => info!("{message}"),
            Level::Warning => warn!("{message}"),
            Level::Error => error!("{message}"),
        }
        let _ = self.events.send(ConsoleEvent::Log { level, message });
    }

    fn info(&self, message: impl Into<String>) {
        self.say(Level::Info, message);
    }

    fn warn(&self, message: impl Into<String>) {
        self.say(Level::Warning, message);
    }

    fn error(&self, message: impl Into<String>) {
        self.say(Level::Error, message);
    }

    fn finished(&self, report: &FinishReport) {
        for problem in &report.errors {
            self.error(format!("Task {}: {problem}", report.task_id));
        }
        match &report.archive {
            Some(path) => self.info(format!(
                "Task {} finished with {} actions, saved to {}",
                report.task_id,
                report.actions,
                path.display()
            )),
            None => self.error(format!(
                "Task {} finished with {} actions but its archive was not written",
                report.task_id, report.actions
            )),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    // 1. Console first, so the tracking script knows where to call back
    let (listener, port) = face::bind(cli.port).await?;
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(16);
    let (event_tx, _) = broadcast::channel::<ConsoleEvent>(64);

    let mut annotator = Annotator::new(
        ChromeLauncher::new(cli.chrome_config()),
        cli.annotator_config(port),
    );
    let (status_tx, status_rx) = watch::channel(annotator.view());

    face::serve(
        listener,
        Arc::new(AppState {
            cmd_tx: cmd_tx.clone(),
            event_tx: event_tx.clone(),
            status_rx,
            default_url: cli.url.clone(),
        }),
    );
    info!("operator console running at http://localhost:{port}");

    let console = Console { events: event_tx };
    console.info("Annotation console initialized.");

    if cli.launch {
        let _ = cmd_tx.send(Command::Launch { url: cli.url.clone() }).await;
    }

    // 2. One command at a time: actions never overlap and the log keeps
    //    the operator's confirmation order
    loop {
        tokio::select! {
            command = cmd_rx.recv() => {
                let Some(command) = command else { break };
                handle(&mut annotator, command, &console).await;
            }
            _ = tokio::signal::ctrl_c() => {
                console.info("Application shutting down...");
                if let Some(report) = annotator.stop_browser().await {
                    console.finished(&report);
                }
                break;
            }
        }
        let view = annotator.view();
        let _ = console.events.send(ConsoleEvent::Status(view.clone()));
        let _ = status_tx.send(view);
    }

    info!("cleanup finished");
    Ok(())
}

async fn handle(annotator: &mut Annotator<ChromeLauncher>, command: Command, console: &Console) {
    match command {
        Command::Launch { url } => {
            console.info(format!("Attempting to launch browser at: {url}"));
            match annotator.launch_browser(&url).await {
                Ok(url) => console.info(format!("Browser launched successfully for {url}")),
                Err(e) => console.error(format!("Browser launch failed: {e}")),
            }
        }
        Command::StartTask { description } => match annotator.start_task(&description).await {
            Ok(StartOutcome::Started {
                task_id,
                trace_warning,
            }) => {
                console.info(format!("Task {task_id} started: {}", description.trim()));
                if let Some(w) = trace_warning {
                    console.warn(format!("Execution trace unavailable for this task: {w}"));
                }
            }
            Ok(StartOutcome::Finished(report)) => console.finished(&report),
            Err(e) => console.warn(e.to_string()),
        },
        Command::PrimarySelected => match annotator.element_selected().await {
            Ok(locked) => {
                let mut message = format!(
                    "Selected element: {} (XPath: {})",
                    locked.descriptor.summary(),
                    locked.descriptor.xpath.as_deref().unwrap_or("N/A")
                );
                if !locked.options.is_empty() {
                    message.push_str(&format!(", {} dropdown options", locked.options.len()));
                }
                console.info(message);
            }
            Err(e) => console.warn(format!("Element selection ignored: {e}")),
        },
        Command::SecondarySelected => match annotator.secondary_selected().await {
            Ok(n) => console.info(format!("{n} secondary elements highlighted")),
            Err(e) => console.warn(format!("Secondary selection ignored: {e}")),
        },
        Command::Record { kind, value } => {
            match annotator.record_action(kind, value.as_deref()).await {
                Ok(ActionOutcome::Recorded { index, executed }) => {
                    let mut message = format!("Recorded #{index}: {kind}");
                    if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                        message.push_str(&format!(" - Value: '{v}'"));
                    }
                    if executed {
                        console.info(message);
                    } else {
                        console.error(format!(
                            "{message} but execution FAILED. Check browser/logs."
                        ));
                    }
                }
                Ok(ActionOutcome::Ignored) => {
                    console.info("Element ignored. Select another element.")
                }
                Ok(ActionOutcome::Finished(report)) => console.finished(&report),
                Err(e) => console.warn(e.to_string()),
            }
        }
        Command::StopBrowser => {
            if let Some(report) = annotator.stop_browser().await {
                console.finished(&report);
            }
            console.info("Browser closed.");
        }
    }
}
