//! quotechat-client - terminal chat client.
//!
//! Connects to a quotechat server over WebSocket, prints every broadcast
//! and sends each stdin line as a chat message. Without credentials the
//! client joins as an anonymous viewer and can only watch.
//!
//! ```bash
//! quotechat-client --username alice --password secret
//! quotechat-client --token "$QUOTECHAT_TOKEN"
//! ```
//!
//! Type `exit` (or close stdin) to leave.

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use quotechat_protocol::{BroadcastMessage, ChatFrame};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Parser)]
#[command(author, version, about = "Terminal client for a quotechat server")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Server port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
    /// Access token from a previous login
    #[arg(long, env = "QUOTECHAT_TOKEN")]
    token: Option<String>,
    /// Log in with this username before connecting
    #[arg(short, long, requires = "password")]
    username: Option<String>,
    /// Password for --username
    #[arg(long, env = "QUOTECHAT_PASSWORD")]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let token = match (&args.token, &args.username, &args.password) {
        (Some(token), _, _) => Some(token.clone()),
        (None, Some(username), Some(password)) => Some(login(&args, username, password).await?),
        _ => None,
    };

    let mut url = format!("ws://{}:{}/ws", args.host, args.port);
    if let Some(token) = &token {
        url.push_str("?token=");
        url.push_str(&urlencoding::encode(token));
    } else {
        eprintln!("No credentials given; joining as a read-only viewer.");
    }

    let (socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("connecting to {}:{}", args.host, args.port))?;
    let (mut sink, mut stream) = socket.split();
    eprintln!("Connected. Type a message, /stock=CODE for a quote, or `exit` to leave.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => print_broadcast(text.as_str()),
                Some(Ok(Message::Close(_))) | None => {
                    eprintln!("Server closed the connection.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
            },
            line = lines.next_line() => {
                let line = line.context("reading stdin")?;
                let Some(line) = line else { break };
                let line = line.trim();
                if line == "exit" {
                    break;
                }
                if line.is_empty() {
                    continue;
                }
                if token.is_none() {
                    eprintln!("Read-only viewer: log in to send messages.");
                    continue;
                }
                let frame = serde_json::to_string(&ChatFrame::new(line))?;
                sink.send(Message::text(frame)).await.context("sending message")?;
            }
        }
    }

    if let Err(e) = sink.send(Message::Close(None)).await {
        debug!("Close frame not sent: {}", e);
    }
    Ok(())
}

async fn login(args: &Args, username: &str, password: &str) -> Result<String> {
    let body = serde_json::json!({ "username": username, "password": password });
    let response = reqwest::Client::new()
        .post(format!("http://{}:{}/auth/login", args.host, args.port))
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(serde_json::to_vec(&body)?)
        .send()
        .await
        .context("sending login request")?;

    let status = response.status();
    let bytes = response.bytes().await.context("reading login response")?;
    if !status.is_success() {
        bail!(
            "login failed ({}): {}",
            status,
            String::from_utf8_lossy(&bytes)
        );
    }

    let login: LoginResponse =
        serde_json::from_slice(&bytes).context("parsing login response")?;
    Ok(login.token)
}

fn print_broadcast(text: &str) {
    match serde_json::from_str::<BroadcastMessage>(text) {
        Ok(message) => {
            let at = message.timestamp.with_timezone(&Local).format("%H:%M:%S");
            println!("[{}] {}: {}", at, message.user, message.content);
        }
        Err(e) => debug!("Ignoring unexpected frame ({}): {}", e, text),
    }
}
