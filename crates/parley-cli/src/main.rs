//! parley CLI: terminal chat client

use chrono::Utc;
use clap::{Parser, Subcommand};
use parley_engine::transcript::{default_export_path, render_markdown, write_transcript};
use parley_engine::{
    data_dir, identity, Config, Controller, FileStore, HttpBackend, KeyValueStore, MemoryStore,
    Message, Role, SessionEvent, API_URL_ENV,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "PARLEY_LOG";

/// Default log filter.
const DEFAULT_LOG_FILTER: &str = "parley=info";

/// Chat with a remote assistant from the terminal
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Backend base URL (overrides the config file and PARLEY_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the chat TUI (default when no command specified)
    Tui,

    /// Send one prompt and print the reply
    Ask {
        /// Prompt text (words are joined with spaces)
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },

    /// Print the stored conversation
    History {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the client identity token
    Whoami,

    /// Forget the identity so the next start begins a new conversation
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Export the conversation as Markdown
    Export {
        /// Output file (defaults to the data directory)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Write a default config file
    Init,

    /// Print the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let is_tui = matches!(cli.command, None | Some(Commands::Tui));
    init_logging(is_tui);

    let config = match load_config(cli.config.as_deref(), cli.api_url.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        None | Some(Commands::Tui) => rt.block_on(parley_tui::run_tui(config)),
        Some(Commands::Ask { prompt }) => rt.block_on(cmd_ask(&config, &prompt.join(" "))),
        Some(Commands::History { json }) => rt.block_on(cmd_history(&config, json)),
        Some(Commands::Whoami) => cmd_whoami(),
        Some(Commands::Reset { yes }) => cmd_reset(yes),
        Some(Commands::Export { output }) => rt.block_on(cmd_export(&config, output)),
        Some(Commands::Init) => cmd_init(cli.config.as_deref()),
        Some(Commands::Config { json }) => cmd_config(&config, cli.config.as_deref(), json),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Install the tracing subscriber.
///
/// The TUI owns the terminal, so it logs to `<data_dir>/parley/parley.log`;
/// everything else logs to stderr.
fn init_logging(is_tui: bool) {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    if !is_tui {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return;
    }

    let Some(dir) = data_dir() else {
        return;
    };
    if std::fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("parley.log"))
    else {
        return;
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .init();
}

/// Load the config file, then apply environment and command-line overrides.
fn load_config(path: Option<&Path>, api_url: Option<&str>) -> Result<Config, String> {
    let config = match path.map(Path::to_path_buf).or_else(Config::default_path) {
        Some(path) => Config::load_or_default(&path)
            .map_err(|e| format!("failed to load {}: {e}", path.display()))?,
        None => Config::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(url) = api_url {
        config.base_url = url.to_string();
    }
    Ok(config)
}

fn open_store() -> Box<dyn KeyValueStore> {
    match FileStore::in_data_dir() {
        Some(store) => Box::new(store),
        None => {
            tracing::warn!("No data directory; identity will not be persisted");
            Box::new(MemoryStore::new())
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

type CliController = Controller<HttpBackend, Box<dyn KeyValueStore>>;

async fn connect(config: &Config) -> Result<CliController, Box<dyn std::error::Error>> {
    let backend = HttpBackend::from_config(config)?;
    let mut controller = Controller::new(config, backend, open_store());
    controller.initialize().await;
    Ok(controller)
}

async fn cmd_ask(config: &Config, prompt: &str) -> CliResult {
    if prompt.trim().is_empty() {
        return Err("prompt is empty".into());
    }

    let backend = HttpBackend::from_config(config)?;
    let (tx, rx) = unbounded_channel();
    let mut controller = Controller::new(config, backend, open_store()).with_event_sink(tx);
    controller.initialize().await;

    // Dropping the controller closes the event channel, so the printer
    // also stops when nothing was sent.
    let submit = async move { controller.submit_prompt(prompt).await };
    let mut stdout = std::io::stdout();
    let (sent, printed) = tokio::join!(submit, print_reply(rx, &mut stdout));
    printed?;
    if !sent {
        return Err("prompt was not sent".into());
    }
    Ok(())
}

/// Stream the reply from session events until the session is idle again.
async fn print_reply<W: Write>(
    mut rx: UnboundedReceiver<SessionEvent>,
    out: &mut W,
) -> std::io::Result<()> {
    let mut shown = 0;
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::RevealStep(visible) => {
                out.write_all(visible[shown..].as_bytes())?;
                out.flush()?;
                shown = visible.len();
            }
            // Fallback and empty replies are appended without a reveal.
            SessionEvent::MessageAppended(Message {
                role: Role::Assistant,
                content,
            }) if shown == 0 => {
                out.write_all(content.as_bytes())?;
            }
            SessionEvent::BusyChanged(false) => break,
            _ => {}
        }
    }
    writeln!(out)?;
    out.flush()
}

async fn cmd_history(config: &Config, json: bool) -> CliResult {
    let controller = connect(config).await?;
    let messages = controller.session().messages();

    if json {
        println!("{}", serde_json::to_string_pretty(messages)?);
        return Ok(());
    }
    print!("{}", format_history(messages));
    Ok(())
}

fn format_history(messages: &[Message]) -> String {
    if messages.is_empty() {
        return "No messages.\n".to_string();
    }
    let mut out = String::new();
    for msg in messages {
        out.push_str(msg.role.label());
        out.push_str(":\n");
        for line in msg.content.lines() {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

fn cmd_whoami() -> CliResult {
    let mut store = open_store();
    let resolved = identity::load_or_create(store.as_mut());
    if resolved.created {
        println!("{} (new)", resolved.token);
    } else {
        println!("{}", resolved.token);
    }
    Ok(())
}

fn cmd_reset(yes: bool) -> CliResult {
    if !yes {
        return Err("reset discards the identity and its conversation; rerun with --yes".into());
    }
    let mut store = open_store();
    identity::discard(store.as_mut())?;
    println!("Identity discarded. The next start begins a new conversation.");
    Ok(())
}

async fn cmd_export(config: &Config, output: Option<PathBuf>) -> CliResult {
    let controller = connect(config).await?;
    let now = Utc::now();
    let session = controller.session();
    let content = render_markdown(
        session.messages(),
        session.user_id().map(|token| token.as_str()),
        now,
    );

    let path = output
        .or_else(|| default_export_path(now))
        .ok_or("no data directory; pass --output")?;
    write_transcript(&path, &content)?;
    println!("Exported {} messages to {}", session.messages().len(), path.display());
    Ok(())
}

fn cmd_init(path: Option<&Path>) -> CliResult {
    let path = path
        .map(Path::to_path_buf)
        .or_else(Config::default_path)
        .ok_or("no config directory; pass --config")?;

    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    Config::default().save(&path)?;
    println!("Created {}", path.display());
    Ok(())
}

fn cmd_config(config: &Config, path: Option<&Path>, json: bool) -> CliResult {
    if json {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    let config_path = path.map(Path::to_path_buf).or_else(Config::default_path);
    let show = |p: Option<PathBuf>| p.map_or_else(|| "(none)".to_string(), |p| p.display().to_string());

    println!("Parley Configuration\n");
    println!("Config file:      {}", show(config_path));
    println!("Identity store:   {}", show(FileStore::in_data_dir().map(|s| s.path().to_path_buf())));
    println!("Log file:         {}", show(data_dir().map(|d| d.join("parley.log"))));
    println!();
    println!("base_url:         {}", config.base_url);
    println!("history timeout:  {}s", config.history_timeout_secs);
    println!("ask timeout:      {}s", config.ask_timeout_secs);
    println!("reveal interval:  {}ms", config.reveal_interval_ms);
    println!("send credentials: {}", config.send_credentials);
    println!("fallback message: {}", config.fallback_message);
    println!();
    println!("{API_URL_ENV} overrides base_url; {LOG_ENV} sets the log filter.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_opens_tui() {
        let cli = Cli::try_parse_from(["parley"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_ask_joins_words() {
        let cli = Cli::try_parse_from(["parley", "ask", "hello", "there"]).unwrap();
        match cli.command {
            Some(Commands::Ask { prompt }) => assert_eq!(prompt.join(" "), "hello there"),
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_ask_requires_prompt() {
        assert!(Cli::try_parse_from(["parley", "ask"]).is_err());
    }

    #[test]
    fn test_global_api_url_after_subcommand() {
        let cli =
            Cli::try_parse_from(["parley", "history", "--api-url", "http://x:1", "--json"]).unwrap();
        assert_eq!(cli.api_url.as_deref(), Some("http://x:1"));
        assert!(matches!(cli.command, Some(Commands::History { json: true })));
    }

    #[test]
    fn test_load_config_cli_url_wins() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"base_url": "http://from-file", "ask_timeout_secs": 7}"#).unwrap();

        let config = load_config(Some(&path), Some("http://from-cli")).unwrap();
        assert_eq!(config.base_url, "http://from-cli");
        assert_eq!(config.ask_timeout_secs, 7);
    }

    #[test]
    fn test_load_config_missing_file_defaults() {
        let temp = TempDir::new().unwrap();
        let config = load_config(Some(&temp.path().join("absent.json")), Some("http://h")).unwrap();
        assert_eq!(config.reveal_interval_ms, 25);
    }

    #[test]
    fn test_load_config_invalid_file_errors() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "nope").unwrap();
        assert!(load_config(Some(&path), None).is_err());
    }

    #[test]
    fn test_format_history() {
        let text = format_history(&[Message::user("hi"), Message::assistant("hello\nworld")]);
        assert_eq!(text, "You:\n  hi\n\nAI:\n  hello\n  world\n\n");
        assert_eq!(format_history(&[]), "No messages.\n");
    }

    #[tokio::test]
    async fn test_print_reply_streams_reveal() {
        let (tx, rx) = unbounded_channel();
        for event in [
            SessionEvent::MessageAppended(Message::user("q")),
            SessionEvent::BusyChanged(true),
            SessionEvent::RevealStep("h".into()),
            SessionEvent::RevealStep("hi".into()),
            SessionEvent::MessageAppended(Message::assistant("hi")),
            SessionEvent::BusyChanged(false),
        ] {
            tx.send(event).unwrap();
        }

        let mut out = Vec::new();
        print_reply(rx, &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "hi\n");
    }

    #[tokio::test]
    async fn test_print_reply_prints_fallback() {
        let (tx, rx) = unbounded_channel();
        tx.send(SessionEvent::MessageAppended(Message::assistant("sorry"))).unwrap();
        tx.send(SessionEvent::BusyChanged(false)).unwrap();

        let mut out = Vec::new();
        print_reply(rx, &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "sorry\n");
    }
}
