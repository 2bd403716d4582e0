//! Manual test harness for a running `gatewayd`: connects, registers a
//! user, then echoes every typed line to stdout as a `message` frame and
//! prints whatever the server sends back.
//!
//! Not a product -- a terminal to poke the wire protocol by hand while
//! developing against a live instance. Lines of the form `to:content` send
//! a point-to-point message; a bare line sends a `ping`.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use gateway_core::{ClientFrame, ServerFrame};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug, Parser)]
#[command(name = "ws-client")]
struct Cli {
    /// Gateway `/ws` URL, e.g. ws://127.0.0.1:8080/ws
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// `userId` to register with on connect.
    #[arg(long)]
    user_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (stream, _response) = tokio_tungstenite::connect_async(&cli.url).await?;
    let (mut write, mut read) = stream.split();

    let register = ClientFrame::Register { user_id: cli.user_id.clone() };
    write.send(WsMessage::Text(serde_json::to_string(&register)?.into())).await?;

    println!("connected as {}; type \"to:content\" to send, a bare line to ping", cli.user_id);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                let frame = parse_input(&line);
                write.send(WsMessage::Text(serde_json::to_string(&frame)?.into())).await?;
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => print_server_frame(&text),
                    Some(Ok(WsMessage::Close(_))) | None => {
                        println!("connection closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        println!("read error: {err}");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

fn parse_input(line: &str) -> ClientFrame {
    match line.split_once(':') {
        Some((to, content)) if !to.is_empty() => ClientFrame::Message {
            to: to.to_string(),
            content: content.to_string(),
        },
        _ => ClientFrame::Ping,
    }
}

fn print_server_frame(text: &str) {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(frame) => println!("< {frame:?}"),
        Err(_) => println!("< {text}"),
    }
}
