//! Code-Sync realtime relay
//! Clients join a room with `join-request`; every later frame is forwarded
//! to the other members of that room.

mod room;

use anyhow::Context;
use clap::Parser;
use collaboration::{JoinRequest, RealtimeMessage, SocketEvent};
use futures_util::{SinkExt, StreamExt};
use room::{RoomRegistry, Tx};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "collab-server")]
#[command(about = "Realtime relay for Code-Sync clients")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "COLLAB_SERVER_ADDR", default_value = "127.0.0.1:8080")]
    addr: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "collab_server=debug,collaboration=info".into()),
        )
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;
    info!("Realtime relay listening on: {}", args.addr);

    serve(listener, Arc::new(RoomRegistry::new())).await;
    Ok(())
}

async fn serve(listener: TcpListener, rooms: Arc<RoomRegistry>) {
    while let Ok((stream, addr)) = listener.accept().await {
        info!("New connection from: {}", addr);
        tokio::spawn(handle_connection(stream, addr, rooms.clone()));
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, rooms: Arc<RoomRegistry>) {
    let ws_stream = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", addr, e);
            return;
        }
    };

    info!("WebSocket connection established: {}", addr);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                error!("Failed to send message: {}", e);
                break;
            }
        }
    });

    let conn = Uuid::new_v4();
    let mut room_id: Option<String> = None;

    while let Some(msg) = ws_receiver.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                error!("Error receiving message: {}", e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                if let Err(e) = handle_frame(&text, &rooms, conn, &tx, &mut room_id).await {
                    warn!("Dropping frame from {}: {}", addr, e);
                }
            }
            Message::Ping(data) => {
                let _ = tx.send(Message::Pong(data));
            }
            Message::Close(_) => {
                info!("Client requested close");
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect
    if let Some(room_id) = room_id {
        rooms.leave(&room_id, conn).await;
    }

    send_task.abort();
    info!("Connection closed: {}", addr);
}

/// The first frame must be `join-request`; later frames are relayed as is.
async fn handle_frame(
    text: &str,
    rooms: &RoomRegistry,
    conn: Uuid,
    tx: &Tx,
    room_id: &mut Option<String>,
) -> anyhow::Result<()> {
    let msg = RealtimeMessage::from_text(text)?;

    if let Some(room) = room_id.as_deref() {
        if msg.event == SocketEvent::JoinRequest.as_str() {
            anyhow::bail!("already joined {}", room);
        }
        let reached = rooms.relay(room, conn, &msg).await;
        debug!("Relayed {} to {} members of {}", msg.event, reached, room);
        return Ok(());
    }

    if msg.event != SocketEvent::JoinRequest.as_str() {
        anyhow::bail!("{} before join-request", msg.event);
    }
    let join: JoinRequest = serde_json::from_value(msg.payload)?;
    rooms
        .join(&join.room_id, conn, &join.username, tx.clone())
        .await;
    *room_id = Some(join.room_id);

    Ok(())
}
