use std::sync::Arc;
use std::time;

use activity_common::event::{Event, EventKind};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::batcher::Notification;
use crate::error::DispatchError;

/// Embed colour used for every message.
pub const EMBED_COLOR: u32 = 0xff9900;

/// Render one notification as message text.
pub fn format_notification(notification: &Notification) -> String {
    match notification {
        Notification::Single(event) => format_event(event),
        Notification::LevelUps { entity, events } => {
            let mut text = format!("**{}** levelled up {} skills!", entity, events.len());
            for event in events {
                if let EventKind::LevelUp { skill, new_level } = &event.kind {
                    text.push_str(&format!("\n- level {} in {}", level_text(*new_level), skill));
                }
            }
            text
        }
    }
}

fn format_event(event: &Event) -> String {
    let entity = &event.entity;
    match &event.kind {
        EventKind::LevelUp { skill, new_level } => format!(
            "**{}** just reached **level {} in {}!**",
            entity,
            level_text(*new_level),
            skill
        ),
        EventKind::QuestCompleted { quest_name } => {
            format!("**{}** completed the quest **{}**!", entity, quest_name)
        }
        EventKind::RareDrop { item, quantity } if *quantity > 1 => format!(
            "**{}** received a rare drop: **{} x {}**!",
            entity, quantity, item
        ),
        EventKind::RareDrop { item, .. } => {
            format!("**{}** received a rare drop: **{}**!", entity, item)
        }
        EventKind::Generic { text } => format!("**{}**: {}", entity, text),
    }
}

fn level_text(level: Option<u32>) -> String {
    match level {
        Some(level) => level.to_string(),
        None => "?".to_owned(),
    }
}

/// The external channel notifications are delivered to.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, target: &str, text: &str) -> Result<(), DispatchError>;
}

/// Posts each message as a single embed to a webhook URL.
pub struct WebhookSink {
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(request_timeout: time::Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent("activity-worker")
            .timeout(request_timeout)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Sink for WebhookSink {
    async fn send(&self, target: &str, text: &str) -> Result<(), DispatchError> {
        let url: reqwest::Url = target.parse()?;
        let body = json!({
            "content": null,
            "embeds": [{ "description": text, "color": EMBED_COLOR }],
        });

        let response = self.client.post(url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status));
        }
        Ok(())
    }
}

/// Logs messages instead of delivering them.
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn send(&self, target: &str, text: &str) -> Result<(), DispatchError> {
        info!(target_channel = target, text, "dry run notification");
        Ok(())
    }
}

/// Formats notifications and hands them to a [`Sink`], bounded by a timeout.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn Sink>,
    timeout: time::Duration,
}

impl Notifier {
    pub fn new(sink: Arc<dyn Sink>, timeout: time::Duration) -> Self {
        Self { sink, timeout }
    }

    pub async fn dispatch(
        &self,
        target: &str,
        notification: &Notification,
    ) -> Result<(), DispatchError> {
        let text = format_notification(notification);

        match tokio::time::timeout(self.timeout, self.sink.send(target, &text)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(self.timeout)),
        }
    }
}
