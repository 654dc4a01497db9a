// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Outbound notification channels

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::Priority;
use crate::config::{NotifyChannel, NotifyConfig};
use crate::error::{Error, Result};
use crate::sensors::Frame;

/// Outbound alert
#[derive(Debug, Clone)]
pub struct Notification {
    pub priority: Priority,
    pub message: String,
    pub snapshot: Option<Frame>,
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Remote messaging capability
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one notification; the caller applies timeout and retries
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log only
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(
            "[{}] {} (event {}, snapshot: {})",
            notification.priority,
            notification.message,
            notification.event_id,
            notification.snapshot.is_some()
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

/// Telegram Bot API channel
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_url: String,
    token: SecretString,
    chat_id: String,
    attach_snapshot: bool,
}

impl TelegramNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        let token = config
            .telegram_bot_token
            .clone()
            .ok_or_else(|| Error::Config("TELEGRAM_BOT_TOKEN is not set".into()))?;
        let chat_id = config
            .telegram_chat_id
            .clone()
            .ok_or_else(|| Error::Config("TELEGRAM_CHAT_ID is not set".into()))?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("homeguard/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_url: config.telegram_api_url.trim_end_matches('/').to_string(),
            token: SecretString::new(token),
            chat_id,
            attach_snapshot: config.attach_snapshot,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token.expose_secret(), method)
    }

    async fn send_message(&self, text: &str) -> Result<reqwest::Response> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
        });
        Ok(self.client.post(self.endpoint("sendMessage")).json(&body).send().await?)
    }

    async fn send_document(&self, caption: &str, frame: &Frame) -> Result<reqwest::Response> {
        let part = reqwest::multipart::Part::bytes(frame.to_pgm())
            .file_name(format!("snapshot-{}.pgm", frame.sequence()))
            .mime_str("image/x-portable-graymap")?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .part("document", part);
        Ok(self.client.post(self.endpoint("sendDocument")).multipart(form).send().await?)
    }
}

#[async_trait]
impl NotificationChannel for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let response = match (&notification.snapshot, self.attach_snapshot) {
            (Some(frame), true) => self.send_document(&notification.message, frame).await?,
            _ => self.send_message(&notification.message).await?,
        };

        let status = response.status();
        let body: TelegramResponse = response
            .json()
            .await
            .map_err(|e| Error::Notify(format!("telegram returned {}: {}", status, e)))?;

        if !body.ok {
            return Err(Error::Notify(format!(
                "telegram rejected message: {}",
                body.description.unwrap_or_else(|| status.to_string())
            )));
        }
        debug!("Telegram delivered event {}", notification.event_id);
        Ok(())
    }
}

/// JSON body published on the alert topic
#[cfg(any(feature = "mqtt", test))]
#[derive(Debug, Serialize)]
struct MqttAlertPayload<'a> {
    event_id: &'a str,
    priority: Priority,
    message: &'a str,
    timestamp: DateTime<Utc>,
    /// Base64 PGM
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<String>,
}

#[cfg(feature = "mqtt")]
mod mqtt {
    use std::time::Duration;

    use base64::Engine as _;
    use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
    use tokio::task::JoinHandle;

    use super::*;

    /// MQTT channel publishing to `<prefix>/alerts/<priority>`
    pub struct MqttNotifier {
        client: AsyncClient,
        topic_prefix: String,
        attach_snapshot: bool,
        event_loop: JoinHandle<()>,
    }

    impl MqttNotifier {
        /// Must be called inside the runtime; the event loop runs as a task
        pub fn new(config: &NotifyConfig) -> Result<Self> {
            let mut options =
                MqttOptions::new(&config.mqtt_client_id, &config.mqtt_broker, config.mqtt_port);
            options.set_keep_alive(Duration::from_secs(30));
            if let (Some(username), Some(password)) = (&config.mqtt_username, &config.mqtt_password) {
                options.set_credentials(username, password);
            }

            let (client, mut eventloop) = AsyncClient::new(options, 32);
            let event_loop = tokio::spawn(async move {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Packet::ConnAck(_))) => {
                            info!("MQTT connected");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!("MQTT error: {:?}", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            });

            info!("MQTT notifier for {}:{}", config.mqtt_broker, config.mqtt_port);
            Ok(Self {
                client,
                topic_prefix: config.mqtt_topic_prefix.trim_end_matches('/').to_string(),
                attach_snapshot: config.attach_snapshot,
                event_loop,
            })
        }

        fn topic(&self, priority: Priority) -> String {
            format!("{}/alerts/{}", self.topic_prefix, priority.to_string().to_lowercase())
        }
    }

    impl Drop for MqttNotifier {
        fn drop(&mut self) {
            self.event_loop.abort();
        }
    }

    #[async_trait]
    impl NotificationChannel for MqttNotifier {
        fn name(&self) -> &str {
            "mqtt"
        }

        async fn send(&self, notification: &Notification) -> Result<()> {
            let snapshot = notification
                .snapshot
                .as_ref()
                .filter(|_| self.attach_snapshot)
                .map(|frame| base64::engine::general_purpose::STANDARD.encode(frame.to_pgm()));

            let payload = MqttAlertPayload {
                event_id: &notification.event_id,
                priority: notification.priority,
                message: &notification.message,
                timestamp: notification.timestamp,
                snapshot,
            };
            let json = serde_json::to_vec(&payload)?;

            self.client
                .publish(self.topic(notification.priority), QoS::AtLeastOnce, false, json)
                .await
                .map_err(|e| Error::Notify(format!("MQTT publish failed: {}", e)))?;
            Ok(())
        }
    }
}

#[cfg(feature = "mqtt")]
pub use mqtt::MqttNotifier;

/// Build the configured channel
pub fn build_notifier(config: &NotifyConfig) -> Result<Arc<dyn NotificationChannel>> {
    match config.channel {
        NotifyChannel::Log => Ok(Arc::new(LogNotifier)),
        NotifyChannel::Telegram => Ok(Arc::new(TelegramNotifier::new(config)?)),
        #[cfg(feature = "mqtt")]
        NotifyChannel::Mqtt => Ok(Arc::new(MqttNotifier::new(config)?)),
        #[cfg(not(feature = "mqtt"))]
        NotifyChannel::Mqtt => Err(Error::Config(
            "mqtt channel requires the `mqtt` feature".into(),
        )),
    }
}
