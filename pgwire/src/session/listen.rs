//! LISTEN/NOTIFY collection
use super::{Session, SessionState};
use crate::error::{PgWireError, Result, ServerError};
use crate::protocol::message::BackendMessage;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use wireprobe_core::utils::utc_now;
use wireprobe_core::{Deadline, StringUtils};

/// An asynchronous notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Process ID of the notifying backend
    pub process_id: i32,

    /// Channel name
    pub channel: String,

    /// Payload, empty when NOTIFY gave none
    pub payload: String,

    /// When this client read the notification
    pub received_at: DateTime<Utc>,
}

/// Outcome of one listen window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenResult {
    /// Channel listened on
    pub channel: String,

    /// Whether the server acknowledged the LISTEN
    pub confirmed: bool,

    /// Notifications in arrival order
    pub notifications: Vec<Notification>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Subscribe to `channel` and collect notifications for `window`
    ///
    /// The LISTEN itself is confirmed under the operation timeout and the
    /// window starts once the server has confirmed it, so the call can take
    /// up to the operation timeout plus `window`.
    ///
    /// The end of the window is not an error: a window in which nothing
    /// arrived yields a confirmed result with no notifications. The
    /// subscription stays active after this returns. Notifications buffered
    /// by earlier operations come first. When the window fails, everything
    /// collected so far stays buffered for [`Session::take_notifications`].
    pub async fn listen(&mut self, channel: &str, window: Duration) -> Result<ListenResult> {
        let sql = format!("LISTEN {}", StringUtils::quote_identifier(channel));
        let confirmation = self.execute(&sql).await?;
        let confirmed = confirmation.command_tag == "LISTEN";
        if !confirmed {
            warn!("LISTEN {} answered with {:?}", channel, confirmation.command_tag);
        }

        let deadline = Deadline::after(window);
        let mut collected = Vec::new();

        let result = self.collect_notifications(&mut collected, deadline).await;
        if result.is_err() {
            self.pending_notifications.append(&mut collected);
        }
        self.settle(result)?;

        let mut notifications = std::mem::take(&mut self.pending_notifications);
        notifications.append(&mut collected);

        info!(
            "Collected {} notifications on {} in {:?}",
            notifications.len(),
            channel,
            window
        );
        Ok(ListenResult {
            channel: channel.to_string(),
            confirmed,
            notifications,
        })
    }

    async fn collect_notifications(
        &mut self,
        notifications: &mut Vec<Notification>,
        deadline: Deadline,
    ) -> Result<()> {
        while !deadline.is_expired() {
            let message = match self.receive(deadline).await {
                Ok(message) => message,
                Err(e) if e.is_timeout() => break,
                Err(e) => return Err(e),
            };

            match message {
                BackendMessage::NotificationResponse {
                    process_id,
                    channel,
                    payload,
                } => {
                    debug!("Notification on {} from {}", channel, process_id);
                    notifications.push(Notification {
                        process_id,
                        channel,
                        payload,
                        received_at: utc_now(),
                    });
                }
                BackendMessage::ErrorResponse(fields) => {
                    // An unsolicited error means the server is ending the session
                    self.state = SessionState::Broken;
                    return Err(PgWireError::Server(ServerError::from(&fields)));
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                other => debug!("Skipping {} while listening", other.name()),
            }
        }
        Ok(())
    }
}
