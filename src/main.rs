use std::io::Write;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use research_chat::config::BASE_URL_ENV;
use research_chat::logging::{self, LogTarget};
use research_chat::stream::Flow;
use research_chat::{handler, tui, ui};
use research_chat::{AgentClient, App, Config, ReplyBuffer, StreamEvent, UploadFile};

#[derive(Parser)]
#[command(name = "research-chat")]
#[command(version, about = "Chat with a remote research agent from the terminal")]
struct Cli {
    /// Agent service base URL (overrides RESEARCH_CHAT_BASE_URL and the config file)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat,
    /// Ask one question and stream the answer to stdout
    Ask {
        /// Your question
        question: String,
        /// Continue an existing thread
        #[arg(short, long)]
        thread: Option<String>,
    },
    /// Start a fresh thread on the server
    Reset {
        #[arg(short, long)]
        thread: Option<String>,
    },
    /// Upload a document into a thread
    Upload {
        path: PathBuf,
        #[arg(short, long)]
        thread: String,
    },
    /// List documents uploaded to a thread
    Docs {
        #[arg(short, long)]
        thread: String,
    },
    /// Remove all documents from a thread
    Clear {
        #[arg(short, long)]
        thread: String,
    },
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a config file with default values
    Init,
    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    let interactive = matches!(cli.command, None | Some(Commands::Chat));
    let target = if interactive {
        LogTarget::File(logging::default_log_path()?)
    } else {
        LogTarget::Stderr
    };
    logging::init(level, target)?;

    let env_url = std::env::var(BASE_URL_ENV).ok();
    let base_url = config.resolve_base_url(cli.base_url.as_deref(), env_url.as_deref());
    let client = AgentClient::new(&base_url)
        .with_timeouts(config.upload_timeout(), config.request_timeout());
    tracing::debug!(%base_url, "agent client ready");

    match cli.command {
        None | Some(Commands::Chat) => run_tui(client).await?,
        Some(Commands::Ask { question, thread }) => {
            ask(&client, &question, thread.as_deref()).await?
        }
        Some(Commands::Reset { thread }) => {
            let outcome = client.reset_chat(thread.as_deref()).await?;
            println!("{}", outcome.thread_id);
            if outcome.documents_cleared {
                eprintln!("Uploaded documents were cleared");
            }
        }
        Some(Commands::Upload { path, thread }) => {
            let file = UploadFile::from_path(&path)?;
            let document = client.upload_document(file, &thread).await?;
            println!("Uploaded {}", document.summary());
        }
        Some(Commands::Docs { thread }) => {
            let documents = client.list_documents(&thread).await;
            if documents.is_empty() {
                println!("No documents");
            }
            for doc in documents {
                println!("  • {}", doc.summary());
            }
        }
        Some(Commands::Clear { thread }) => {
            if !client.clear_documents(&thread).await {
                return Err(anyhow!("Could not clear documents for thread {}", thread));
            }
            println!("Cleared documents for thread {}", thread);
        }
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init => {
                let path = config.save()?;
                println!("Wrote {}", path.display());
            }
            ConfigAction::Show => {
                println!("config file:     {}", Config::get_config_path()?.display());
                println!("base url:        {}", base_url);
                println!("upload timeout:  {}s", config.upload_timeout_secs);
                println!("request timeout: {}s", config.request_timeout_secs);
                println!("log level:       {}", config.log_level);
            }
        },
    }

    Ok(())
}

async fn run_tui(client: AgentClient) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();
    let mut app = App::new(client, events.sender());

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;

            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event)?,
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    app.shutdown();
    tui::restore()?;
    result
}

/// One-shot question: print the reply as it streams in.
async fn ask(client: &AgentClient, question: &str, thread_id: Option<&str>) -> Result<()> {
    let mut events = client.send_chat_stream(question, thread_id).await?;
    let mut reply = ReplyBuffer::new();
    let mut stdout = std::io::stdout();

    while let Some(event) = events.next_event().await {
        let event = event?;
        match &event {
            StreamEvent::ThreadId { thread_id } => eprintln!("thread: {}", thread_id),
            StreamEvent::Content { content } => {
                write!(stdout, "{}", content)?;
                stdout.flush()?;
            }
            _ => {}
        }
        if reply.apply(event) == Flow::Stop {
            break;
        }
    }
    println!();

    match reply.error() {
        Some(error) => Err(anyhow!("Agent error: {}", error)),
        None => Ok(()),
    }
}
