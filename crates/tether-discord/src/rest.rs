use serde::Serialize;
use serde_json::Value;
use tether_core::{Result, TetherError};
use tracing::warn;

pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

pub const COLOR_GREEN: u32 = 0x00ff00;
pub const COLOR_YELLOW: u32 = 0xffff00;
pub const COLOR_RED: u32 = 0xff0000;
pub const COLOR_BLUE: u32 = 0x0099ff;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// A Discord rich embed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    /// ISO 8601.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Embed {
    pub fn new(color: u32) -> Self {
        Self {
            color: Some(color),
            ..Self::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(EmbedFooter { text: text.into() });
        self
    }

    pub fn timestamp(mut self, at: chrono::DateTime<chrono::Utc>) -> Self {
        self.timestamp = Some(at.to_rfc3339());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageReference {
    pub message_id: String,
}

/// Body of a create-message call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReference>,
}

impl MessagePayload {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            embeds: vec![embed],
            ..Self::default()
        }
    }

    pub fn reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.message_reference = Some(MessageReference {
            message_id: message_id.into(),
        });
        self
    }
}

/// Minimal Discord REST client: messages out, channels in.
pub struct RestClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl RestClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            base_url: DISCORD_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub async fn send_message(&self, channel_id: &str, payload: &MessagePayload) -> Result<()> {
        let url = format!("{}/channels/{channel_id}/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .json(payload)
            .send()
            .await
            .map_err(|e| TetherError::Gateway(format!("HTTP error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %text, channel = %channel_id, "Discord API error sending message");
            return Err(TetherError::Gateway(format!("Discord API {status}: {text}")));
        }
        Ok(())
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Value> {
        let url = format!("{}/channels/{channel_id}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await
            .map_err(|e| TetherError::Gateway(format!("HTTP error: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            return Err(TetherError::Validation(format!("channel {channel_id} not accessible")));
        }
        if !status.is_success() {
            return Err(TetherError::Gateway(format!("Discord API {status}")));
        }
        resp.json()
            .await
            .map_err(|e| TetherError::Gateway(format!("bad channel payload: {e}")))
    }
}
