use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use parley_types::Message;
use parley_types::events::{PHX_CLOSE, PHX_ERROR, PhoenixFrame};

use crate::{BackendError, MESSAGES_TABLE};

/// The realtime server drops sockets that stay silent for ~60s.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

const SCHEMA: &str = "public";

/// Run the INSERT feed for the messages table until `cancel` fires, the
/// socket closes, or the receiving side goes away. Decoded rows go to `tx`.
///
/// `tokens` carries the current bearer; every change after the join is
/// forwarded to the channel as an `access_token` push.
pub(super) async fn run_insert_feed(
    url: Url,
    mut tokens: watch::Receiver<String>,
    tx: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
) {
    if let Err(e) = run_feed(&url, &mut tokens, &tx, &cancel).await {
        warn!("Realtime feed ended with error: {}", e);
    }
}

async fn run_feed(
    url: &Url,
    tokens: &mut watch::Receiver<String>,
    tx: &mpsc::UnboundedSender<Message>,
    cancel: &CancellationToken,
) -> Result<(), BackendError> {
    let (ws_stream, _) = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        result = tokio_tungstenite::connect_async(url.as_str()) => result?,
    };
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let mut next_ref: u64 = 1;
    let access_token = tokens.borrow_and_update().clone();
    let join = PhoenixFrame::join_inserts(SCHEMA, MESSAGES_TABLE, &access_token, next_ref);
    let topic = join.topic.clone();
    ws_tx.send(WsMessage::Text(serde_json::to_string(&join)?)).await?;
    info!("Joined realtime topic {}", topic);

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                next_ref += 1;
                let leave = PhoenixFrame::leave(&topic, next_ref);
                // Best effort: the socket is closed either way.
                let _ = ws_tx.send(WsMessage::Text(serde_json::to_string(&leave)?)).await;
                let _ = ws_tx.close().await;
                debug!("Left realtime topic {}", topic);
                return Ok(());
            }
            Ok(()) = tokens.changed() => {
                next_ref += 1;
                let access_token = tokens.borrow_and_update().clone();
                let push = PhoenixFrame::access_token(&topic, &access_token, next_ref);
                ws_tx.send(WsMessage::Text(serde_json::to_string(&push)?)).await?;
                debug!("Pushed a fresh access token to {}", topic);
            }
            _ = heartbeat.tick() => {
                next_ref += 1;
                let beat = PhoenixFrame::heartbeat(next_ref);
                ws_tx.send(WsMessage::Text(serde_json::to_string(&beat)?)).await?;
            }
            frame = ws_rx.next() => {
                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("Realtime socket closed by server");
                        return Ok(());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                };

                let frame: PhoenixFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!("Bad realtime frame: {} -- raw: {}", e, raw);
                        continue;
                    }
                };

                if let Some(status) = frame.reply_status() {
                    if status != "ok" {
                        warn!("Realtime {} replied {}: {}", frame.topic, status, frame.payload);
                    }
                    continue;
                }

                if frame.topic == topic && (frame.event == PHX_ERROR || frame.event == PHX_CLOSE) {
                    warn!("Realtime topic {} ended with {}", topic, frame.event);
                    return Ok(());
                }

                match frame.inserted_record() {
                    Some(Ok(message)) => {
                        trace!("Insert event for message {}", message.id);
                        if tx.send(message).is_err() {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => warn!("Undecodable insert record: {}", e),
                    None => {}
                }
            }
        }
    }
}
