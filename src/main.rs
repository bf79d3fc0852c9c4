//! Emergent Mind CLI entry point

use std::io::{self, Write};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use emergent_mind::config::{self, Config};
use emergent_mind::gateway::{self, GatewayClient};
use emergent_mind::{ui, Error};

#[derive(Parser)]
#[command(name = "emergent-mind")]
#[command(about = "Emergent Mind - a tool-using agent with a streaming gateway")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Message to send (gateway first, in-process if none is running)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    words: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket gateway
    Gateway {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the agent
    Agent {
        /// Message to send; interactive mode when omitted
        #[arg(short, long)]
        message: Option<String>,

        /// Session ID (gateway only)
        #[arg(short, long)]
        session: Option<String>,

        /// Run the agent in this process instead of through the gateway
        #[arg(long)]
        no_gateway: bool,
    },

    /// Send messages through a running gateway
    Message {
        #[command(subcommand)]
        action: MessageAction,
    },
}

#[derive(Subcommand)]
enum MessageAction {
    /// Send one message and print the full reply once it is done
    Send {
        /// Session that receives the message
        to: String,

        /// Message text; the remaining words are used when omitted
        #[arg(long)]
        message: Option<String>,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },
}

/// How a message reaches the agent.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Gateway,
    InProcess,
    GatewayWithFallback,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = config::load();
    std::fs::create_dir_all(&config.agent.workspace)?;

    match cli.command {
        Some(Commands::Gateway { port }) => {
            if let Some(port) = port {
                config.gateway.port = port;
            }
            gateway::run(&config).await?;
        }

        Some(Commands::Agent { message, session, no_gateway }) => {
            let mode = if no_gateway { Mode::InProcess } else { Mode::Gateway };
            match message {
                Some(msg) => {
                    let reply = send(&config, mode, &msg, session.as_deref()).await?;
                    print_reply(&reply);
                }
                None => run_interactive(&config, mode, session.as_deref()).await?,
            }
        }

        Some(Commands::Message { action: MessageAction::Send { to, message, words } }) => {
            let message = message.unwrap_or_else(|| words.join(" "));
            if message.trim().is_empty() {
                ui::print_step("Usage: emergent-mind message send <to> --message \"...\"");
                return Ok(());
            }
            let reply = send_quiet(&config, &message, &to).await?;
            println!("{}", reply);
        }

        None if cli.words.is_empty() => {
            ui::print_step("Usage: emergent-mind <message>  |  emergent-mind gateway  |  emergent-mind agent -m <message>");
        }

        None => {
            let message = cli.words.join(" ");
            let reply = send(&config, Mode::GatewayWithFallback, &message, None).await?;
            print_reply(&reply);
        }
    }

    Ok(())
}

/// Final answer and whether it was already echoed while streaming.
struct Reply {
    text: String,
    streamed: bool,
}

impl Reply {
    fn in_process(text: String) -> Self {
        Self { text, streamed: false }
    }
}

/// Deliver one message; gateway replies are echoed to stdout as they stream.
async fn send(config: &Config, mode: Mode, message: &str, session: Option<&str>) -> Result<Reply> {
    if mode == Mode::InProcess {
        return Ok(Reply::in_process(gateway::handle_message(config, message).await?));
    }

    let url = config.gateway_url();
    let echo = |chunk: &str| {
        print!("{}", chunk);
        let _ = io::stdout().flush();
    };

    match GatewayClient::new(url.as_str()).send(message, session, echo).await {
        Ok(text) => Ok(Reply { text, streamed: true }),
        Err(Error::GatewayUnavailable(_)) if mode == Mode::GatewayWithFallback => {
            tracing::debug!("Gateway unavailable at {}, running in-process", url);
            Ok(Reply::in_process(gateway::handle_message(config, message).await?))
        }
        Err(e @ Error::GatewayUnavailable(_)) => {
            ui::print_gateway_hint(&url);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

/// Gateway only; the reply is returned whole instead of streamed.
async fn send_quiet(config: &Config, message: &str, session: &str) -> Result<String> {
    let url = config.gateway_url();
    match GatewayClient::new(url.as_str()).send(message, Some(session), |_| {}).await {
        Ok(text) => Ok(text),
        Err(e @ Error::GatewayUnavailable(_)) => {
            ui::print_gateway_hint(&url);
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_reply(reply: &Reply) {
    if reply.streamed {
        println!();
    } else {
        println!("{}", reply.text);
    }
}

async fn run_interactive(config: &Config, mode: Mode, session: Option<&str>) -> Result<()> {
    ui::print_step("Interactive mode (type 'exit' to quit)");

    loop {
        print!("\x1b[1;34mYou\x1b[0m: ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }
        if input.is_empty() {
            continue;
        }

        print!("\x1b[1;32mAgent\x1b[0m: ");
        io::stdout().flush()?;
        match send(config, mode, input, session).await {
            Ok(reply) => print_reply(&reply),
            Err(e) => {
                println!();
                ui::print_error(&e.to_string());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("emergent-mind").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_message_send_takes_flag_or_words() {
        match parse(&["message", "send", "work", "--message=hello there"]).command {
            Some(Commands::Message { action: MessageAction::Send { to, message, words } }) => {
                assert_eq!(to, "work");
                assert_eq!(message.as_deref(), Some("hello there"));
                assert!(words.is_empty());
            }
            _ => panic!("expected message send"),
        }

        match parse(&["message", "send", "main", "what", "is", "2+2"]).command {
            Some(Commands::Message { action: MessageAction::Send { to, message, words } }) => {
                assert_eq!(to, "main");
                assert_eq!(message, None);
                assert_eq!(words.join(" "), "what is 2+2");
            }
            _ => panic!("expected message send"),
        }
    }

    #[test]
    fn test_bare_words_are_a_message() {
        let cli = parse(&["list", "the", "files"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.words, vec!["list", "the", "files"]);
    }

    #[tokio::test]
    async fn test_message_send_does_not_fall_back_in_process() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = Config::default();
        config.gateway.port = port;

        let err = send_quiet(&config, "hi", "main").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::GatewayUnavailable(_))
        ));
    }
}
