//! Chat and connection history writers

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::event::{Envelope, EventKind, Payload, Subscription};
use crate::store::{with_deadline, ChatRecord, ConnectionRecord, Store, StoreError};

pub fn chat_record(event: &Envelope) -> Option<ChatRecord> {
    let team_only = match event.kind() {
        EventKind::Say => false,
        EventKind::SayTeam => true,
        _ => return None,
    };
    let actor = event.actor.as_ref()?;
    let message = event.message()?;

    Some(ChatRecord {
        steam_id: actor.steam_id,
        server_id: event.origin.id,
        name: actor.name.clone(),
        message: message.to_string(),
        team_only,
        created_at: event.occurred_at,
    })
}

pub fn connection_record(event: &Envelope) -> Option<ConnectionRecord> {
    if event.kind() != EventKind::Connected {
        return None;
    }
    let actor = event.actor.as_ref()?;
    let address = match &event.payload {
        Payload::Connected { address } => address.or(actor.address),
        _ => actor.address,
    };

    Some(ConnectionRecord {
        steam_id: actor.steam_id,
        server_id: event.origin.id,
        name: actor.name.clone(),
        address,
        created_at: event.occurred_at,
    })
}

/// Appends chat lines and connections to the store in arrival order
pub struct HistoryWriter {
    store: Arc<dyn Store>,
    timeout: Duration,
}

impl HistoryWriter {
    pub fn new(store: Arc<dyn Store>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Returns false when the event carries nothing to record
    pub async fn write(&self, event: &Envelope) -> Result<bool, StoreError> {
        match event.kind() {
            EventKind::Say | EventKind::SayTeam => {
                let Some(record) = chat_record(event) else {
                    tracing::warn!(server = %event.origin.name, "Empty person message body, skipping");
                    return Ok(false);
                };
                with_deadline(self.timeout, self.store.append_chat_history(&record)).await?;
                Ok(true)
            }
            EventKind::Connected => {
                let Some(record) = connection_record(event) else {
                    return Ok(false);
                };
                with_deadline(self.timeout, self.store.append_connection_history(&record)).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn run(self, mut subscription: Subscription, cancel: CancellationToken) {
        let name = subscription.name().to_string();
        tracing::info!(writer = %name, "History writer started");

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                next = subscription.recv() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            if let Err(e) = self.write(&event).await {
                tracing::error!(writer = %name, kind = %event.kind(), error = %e, "Failed to write history");
            }
        }

        tracing::debug!(writer = %name, "History writer stopped");
    }
}
