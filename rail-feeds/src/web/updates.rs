//! WebSocket stream of fan-out events.
//!
//! Every connection starts with a bootstrap of recent updates and then
//! follows the live stream. A client may narrow the stream to some
//! services by sending `{"type": "subscribe", "service_ids": [...]}`; an
//! empty list goes back to everything.

use std::collections::HashSet;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::fanout::FanoutEvent;

use super::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe { service_ids: Vec<String> },
}

pub(super) async fn stream_updates(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.fanout.subscribe();
    let (filter_tx, filter_rx) = watch::channel(HashSet::<String>::new());

    let forward_task = tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            let event = {
                let filter = filter_rx.borrow();
                narrow(event, &filter)
            };
            let Some(event) = event else {
                continue;
            };
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "failed to serialize fan-out event");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Subscribe { service_ids }) => {
                    debug!(services = service_ids.len(), "updates subscription changed");
                    filter_tx.send_replace(service_ids.into_iter().collect());
                }
                Err(e) => debug!(error = %e, "ignoring unrecognised client message"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    forward_task.abort();
}

/// Drop updates for services outside `filter`. An empty filter passes
/// everything; a bootstrap is always sent, possibly empty.
fn narrow(event: FanoutEvent, filter: &HashSet<String>) -> Option<FanoutEvent> {
    if filter.is_empty() {
        return Some(event);
    }
    match event {
        FanoutEvent::Bootstrap { mut updates } => {
            updates.retain(|u| filter.contains(&u.service_id));
            Some(FanoutEvent::Bootstrap { updates })
        }
        FanoutEvent::Update { update } => {
            filter
                .contains(&update.service_id)
                .then_some(FanoutEvent::Update { update })
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::domain::ServiceUpdate;

    fn update(id: &str) -> ServiceUpdate {
        ServiceUpdate::new(id, Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap())
    }

    #[test]
    fn empty_filter_passes_everything() {
        let event = FanoutEvent::Update { update: update("A") };
        assert_eq!(narrow(event.clone(), &HashSet::new()), Some(event));
    }

    #[test]
    fn filter_narrows_updates_and_bootstrap() {
        let filter: HashSet<String> = ["A".to_string()].into();
        assert_eq!(
            narrow(FanoutEvent::Update { update: update("B") }, &filter),
            None
        );
        let Some(FanoutEvent::Bootstrap { updates }) = narrow(
            FanoutEvent::Bootstrap {
                updates: vec![update("A"), update("B")],
            },
            &filter,
        ) else {
            panic!("expected bootstrap");
        };
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].service_id, "A");
    }
}
