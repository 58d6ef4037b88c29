mod input;
mod view;
mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use session::join::AdmissionPolicy;
use session::{
    AnswerKey, LogSummarySink, PeerIdentity, PuzzleContent, SessionConfig, SessionError, SessionHandle,
    SessionOptions, Transport, host_session, join_session,
};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::input::{HELP, Input, InputError};
use crate::view::View;
use crate::ws::WsTransport;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("relay health check failed: HTTP {0}")]
    Unhealthy(u16),
    #[error(transparent)]
    AnswerKey(#[from] session::content::AnswerKeyError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("stdin: {0}")]
    Stdin(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "casefile-cli", about = "Casefile session peer over the websocket relay")]
struct Cli {
    #[arg(long, env = "CASEFILE_RELAY_URL", default_value = "http://127.0.0.1:3000")]
    relay_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that the relay is up.
    Ping,
    /// Open a session and act as its host.
    Host(HostArgs),
    /// Join a session someone else is hosting.
    Join(PeerArgs),
}

#[derive(Args, Debug)]
struct PeerArgs {
    /// Session code shared by everyone in the playthrough.
    #[arg(long)]
    session: String,

    /// Answer key JSON: `{"tasks": [{"id": "...", "answers": ["..."]}]}`.
    #[arg(long)]
    answers: PathBuf,

    #[arg(long, env = "CASEFILE_NAME", default_value = "")]
    name: String,
}

#[derive(Args, Debug)]
struct HostArgs {
    #[command(flatten)]
    peer: PeerArgs,

    /// Admit every join request without asking.
    #[arg(long)]
    auto_approve: bool,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Ping => run_ping(&cli.relay_url).await,
        Command::Host(args) => {
            let admission = if args.auto_approve { AdmissionPolicy::AutoApprove } else { AdmissionPolicy::Prompt };
            run_peer(&cli.relay_url, args.peer, Some(admission)).await
        }
        Command::Join(args) => run_peer(&cli.relay_url, args, None).await,
    }
}

async fn run_ping(relay_url: &str) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", relay_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::Unhealthy(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

/// Connect as host (`Some(admission)`) or guest and run until the session ends.
async fn run_peer(relay_url: &str, args: PeerArgs, hosting: Option<AdmissionPolicy>) -> Result<(), CliError> {
    let content: Arc<dyn PuzzleContent> = Arc::new(AnswerKey::load(&args.answers)?);
    let mut config = SessionConfig::from_env();
    if let Some(admission) = hosting {
        config = config.with_admission(admission);
    }
    let identity = PeerIdentity::generate(args.name);
    eprintln!("you are {} ({})", identity.label(), identity.peer_id);

    let transport: Arc<dyn Transport> = Arc::new(WsTransport::new(relay_url));
    let options = SessionOptions {
        identity,
        session_code: args.session,
        content,
        config,
        sink: Arc::new(LogSummarySink),
    };
    let handle = if hosting.is_some() {
        host_session(transport, options).await?
    } else {
        join_session(transport, options).await?
    };

    let session = handle.session().clone();
    println!(
        "session {} hosted by {} with {} tasks; type `help` for commands",
        session.session_code, session.host_peer_id, session.task_count
    );
    interact(handle, View::new(session)).await
}

async fn interact(mut handle: SessionHandle, mut view: View) -> Result<(), CliError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = handle.next_event() => {
                let Some(event) = event else { break };
                println!("{}", view.apply(&event));
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match input::parse_line(&line) {
                    Ok(Input::Session(commands)) => {
                        let mut stopped = false;
                        for command in commands {
                            if handle.send(command).await.is_err() {
                                stopped = true;
                                break;
                            }
                        }
                        if stopped {
                            break;
                        }
                    }
                    Ok(Input::Members) => println!("{}", view.members_report()),
                    Ok(Input::State) => println!("{}", view.state_report()),
                    Ok(Input::Help) => println!("{HELP}"),
                    Ok(Input::Quit) => break,
                    Err(InputError::Empty) => {}
                    Err(e) => eprintln!("{e}"),
                }
            }
        }
    }

    let exit = handle.leave().await?;
    println!("{}", view::exit_line(exit));
    Ok(())
}
