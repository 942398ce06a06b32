mod config;
mod input;
mod render;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use parley_backend::{Backend, RemoteBackend, RemoteConfig};
use parley_client::{ChatController, render as render_view};

use config::Config;
use input::Command;

/// How long to wait on quit for the change feed to leave its channel.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they can be redirected away from the chat screen
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_cli=info,parley_client=info,parley_backend=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    let remote = Arc::new(RemoteBackend::new(RemoteConfig::new(
        &config.url,
        config.anon_key.clone(),
    )?));
    info!("Connecting to {}", config.url);

    let backend: Arc<dyn Backend> = remote.clone();
    let mut controller = ChatController::mount(backend).await;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    redraw(&controller, config.width)?;

    loop {
        tokio::select! {
            event = controller.next_event() => controller.apply(event),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&mut controller, &line) {
                    break;
                }
            }
        }
        redraw(&controller, config.width)?;
    }

    controller.unmount();
    if tokio::time::timeout(CLOSE_GRACE, remote.close()).await.is_err() {
        warn!("Realtime feed did not close in time");
    }
    info!("Bye");
    Ok(())
}

/// Returns false when the user asked to quit.
fn handle_line(controller: &mut ChatController, line: &str) -> bool {
    let signed_in = controller.snapshot().session.is_some();

    match input::parse(line) {
        Command::Quit => return false,
        Command::Login { email, password } if !signed_in => {
            controller.sign_in(&email, &password);
        }
        Command::SignUp { email, password } if !signed_in => {
            controller.sign_up(&email, &password);
        }
        Command::Logout if signed_in => {
            controller.logout();
        }
        Command::Text(text) if signed_in => {
            controller.set_draft(text);
            controller.submit();
        }
        Command::Invalid(reason) => warn!("{}", reason),
        // Credentials may be in the line; do not log it.
        _ => debug!("Command not available in the current view"),
    }
    true
}

fn redraw(controller: &ChatController, width: usize) -> std::io::Result<()> {
    let screen = render_view(&controller.snapshot(), chrono::Utc::now());
    let mut out = std::io::stdout().lock();
    // Clear and home the cursor, then paint the whole screen.
    write!(out, "\x1b[2J\x1b[H")?;
    for line in render::draw(&screen, width) {
        writeln!(out, "{}", line)?;
    }
    out.flush()
}
