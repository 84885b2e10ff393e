// src/main.rs
use std::{
    fs,
    io::{self, Stdout, Write},
    path::Path,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use whatsthis::{
    config::{get_user_config_path, Settings},
    credentials::Credentials,
    format::format_explanation,
    input,
    models::{PopupContent, PopupGeometry, Position, Viewport},
    network::GeminiClient,
    page::Page,
    popup::PopupManager,
    router::RequestRouter,
    selection::{SelectionController, SETTLE_DELAY},
    storage::{KeyValueStore, MemoryStore, TomlFileStore},
    theme::Theme,
    transport::Bridge,
    ui::{self, TERMINAL_GEOMETRY},
};

const SAMPLE_TEXT: &str = "\
Select any term below with the mouse to get a short explanation.

Rust frees memory through RAII: every value has an owner, and when the
owner goes out of scope the value is dropped. The borrow checker enforces
that references never outlive the data they point to, which rules out
use-after-free and data races at compile time.

Async code is built on futures that an executor such as tokio polls until
they complete. A oneshot channel carries a single value between tasks.";

#[derive(Parser)]
#[command(name = "whatsthis", version, about = "Select text, get a short AI explanation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Open a document and explain whatever you select with the mouse
    View { file: Option<String> },
    /// Explain a single term and print the result
    Explain { text: String },
    /// Save the Gemini API key
    SetKey { key: String },
    /// Show the saved Gemini API key
    GetKey {
        #[arg(long)]
        reveal: bool,
    },
    /// Check that a Gemini API key works, without saving it
    TestKey { key: String },
}

/// The privileged half, running on its own runtime.
struct Background {
    rt: Runtime,
    bridge: Bridge,
    shutdown: CancellationToken,
}

impl Background {
    fn start(settings: &Settings) -> Result<Self> {
        let rt = Runtime::new()?;
        let store: Arc<dyn KeyValueStore> = match TomlFileStore::user() {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(error = %e, "falling back to in-memory key storage");
                Arc::new(MemoryStore::new())
            }
        };
        let service = GeminiClient::new(settings).context("failed to build HTTP client")?;
        let router = Arc::new(RequestRouter::new(Arc::new(service), Credentials::new(store)));
        rt.block_on(router.start());

        let (bridge, port) = Bridge::new();
        let shutdown = CancellationToken::new();
        rt.spawn(router.run(port, shutdown.clone()));
        Ok(Self { rt, bridge, shutdown })
    }

    fn stop(self) {
        self.shutdown.cancel();
        self.rt.shutdown_timeout(Duration::from_secs(1));
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::View { file: None });
    init_logging(matches!(command, Command::View { .. }));

    let settings = Settings::new().context("failed to load settings")?;
    match command {
        Command::View { file } => run_viewer(file, &settings),
        Command::Explain { text } => explain_once(&text, &settings),
        Command::SetKey { key } => set_key(&key, &settings),
        Command::GetKey { reveal } => get_key(reveal, &settings),
        Command::TestKey { key } => test_key(&key, &settings),
    }
}

fn init_logging(to_file: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,whatsthis=info"));
    if !to_file {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return;
    }

    // The viewer owns the terminal, so logs go to a file next to the config.
    // The terminal is still ours here, so a failure is reported on stderr.
    let Some(path) = get_user_config_path().map(|p| p.with_extension("log")) else {
        eprintln!("warning: no home directory, logging disabled");
        return;
    };
    match open_log_file(&path) {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        Err(e) => eprintln!("warning: cannot open log file {}: {e}, logging disabled", path.display()),
    }
}

fn open_log_file(path: &Path) -> io::Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::OpenOptions::new().create(true).append(true).open(path)
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

/// Best effort; runs on error paths too, so failures are only logged.
fn restore_terminal<W: Write>(out: &mut W) {
    if let Err(e) = terminal::disable_raw_mode() {
        warn!(error = %e, "failed to leave raw mode");
    }
    if let Err(e) = execute!(out, LeaveAlternateScreen, DisableMouseCapture) {
        warn!(error = %e, "failed to leave alternate screen");
    }
}

fn run_viewer(file: Option<String>, settings: &Settings) -> Result<()> {
    let (title, text) = match file {
        Some(path) => {
            let expanded = shellexpand::tilde(&path).to_string();
            let text = fs::read_to_string(&expanded).with_context(|| format!("failed to read {expanded}"))?;
            (expanded, text)
        }
        None => ("whatsthis".to_string(), SAMPLE_TEXT.to_string()),
    };

    let background = Background::start(settings)?;
    let (cols, rows) = terminal::size()?;
    let popups = PopupManager::new(
        settings.max_popups,
        Viewport::new(cols as i32, rows as i32),
        TERMINAL_GEOMETRY,
    );
    let mut controller =
        SelectionController::new(popups, background.bridge.connect_page(), Some(settings.auto_close()));
    let mut page = Page::new(&text);
    let theme = Theme::default();

    let mut terminal = match setup_terminal() {
        Ok(terminal) => terminal,
        Err(e) => {
            restore_terminal(&mut io::stdout());
            drop(controller);
            background.stop();
            return Err(e.context("failed to set up terminal"));
        }
    };
    info!(document = %title, "viewer started");

    let result = event_loop(&mut terminal, &mut page, &mut controller, &title, &theme);

    controller.teardown(Instant::now());
    restore_terminal(terminal.backend_mut());
    if let Err(e) = terminal.show_cursor() {
        warn!(error = %e, "failed to show cursor");
    }
    drop(controller);
    background.stop();
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    page: &mut Page,
    controller: &mut SelectionController,
    title: &str,
    theme: &Theme,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui::render(f, page, controller, title, theme))?;

        if event::poll(Duration::from_millis(50))? {
            let (cols, rows) = terminal::size()?;
            let screen = Rect::new(0, 0, cols, rows);
            if !input::handle_event(event::read()?, screen, page, controller, Instant::now())? {
                return Ok(());
            }
        }
        controller.tick(Instant::now(), &*page);
    }
}

fn explain_once(text: &str, settings: &Settings) -> Result<()> {
    let background = Background::start(settings)?;
    let popups = PopupManager::new(settings.max_popups, Viewport::new(1280, 800), PopupGeometry::default());
    let mut controller = SelectionController::new(popups, background.bridge.connect_page(), None);

    let selection = text.trim();
    if !controller.should_show_popup(selection) {
        println!("Selection does not qualify for an explanation.");
        drop(controller);
        background.stop();
        return Ok(());
    }

    let start = Instant::now();
    controller.handle_pointer_up(Position::default(), start);
    controller.tick(start + SETTLE_DELAY, selection);

    let deadline = start + settings.request_timeout() + Duration::from_secs(5);
    let content = loop {
        let now = Instant::now();
        controller.tick(now, selection);
        let content = controller
            .current_popup()
            .and_then(|id| controller.popups().get(id))
            .map(|popup| popup.content.clone());
        match content {
            Some(PopupContent::Loading) if now < deadline => std::thread::sleep(Duration::from_millis(20)),
            Some(PopupContent::Loading) | None => break None,
            other => break other,
        }
    };

    drop(controller);
    background.stop();
    match content {
        Some(PopupContent::Explanation(explanation)) => {
            for line in format_explanation(&explanation) {
                let plain: String = line.into_iter().map(|frag| frag.text).collect();
                println!("{plain}");
            }
            Ok(())
        }
        Some(PopupContent::Error(message)) => bail!(message),
        _ => bail!("No explanation received."),
    }
}

fn set_key(key: &str, settings: &Settings) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        bail!("Please enter an API key");
    }
    let background = Background::start(settings)?;
    let port = background.bridge.connect_page();
    let reply = background.rt.block_on(port.save_api_key(key));
    drop(port);
    background.stop();

    let reply = reply?;
    if !reply.success {
        bail!("Failed to save API key: {}", reply.error.unwrap_or_default());
    }
    println!("API key saved successfully!");
    Ok(())
}

fn get_key(reveal: bool, settings: &Settings) -> Result<()> {
    let background = Background::start(settings)?;
    let port = background.bridge.connect_page();
    let key = background.rt.block_on(port.get_api_key());
    drop(port);
    background.stop();

    match key? {
        Some(key) if reveal => println!("{key}"),
        Some(key) => println!("{}", mask(&key)),
        None => println!("No API key configured."),
    }
    Ok(())
}

fn test_key(key: &str, settings: &Settings) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        bail!("Please enter an API key to test");
    }
    println!("Testing connection...");
    let background = Background::start(settings)?;
    let port = background.bridge.connect_page();
    let reply = background.rt.block_on(port.test_api_key(key));
    drop(port);
    background.stop();

    let reply = reply?;
    if !reply.success {
        bail!("❌ Connection failed: {}", reply.error.unwrap_or_default());
    }
    println!("✅ Connection successful! API key is working.");
    Ok(())
}

fn mask(key: &str) -> String {
    let shown: String = key.chars().take(4).collect();
    format!("{shown}{}", "*".repeat(key.chars().count().saturating_sub(4)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("whatsthis.log");
        open_log_file(&path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn unusable_log_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        assert!(open_log_file(&blocker.join("whatsthis.log")).is_err());
    }

    #[test]
    fn mask_keeps_first_four_characters() {
        assert_eq!(mask("abcdefgh"), "abcd****");
        assert_eq!(mask("ab"), "ab");
    }
}
