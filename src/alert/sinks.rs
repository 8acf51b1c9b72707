use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::Settings;

/// Discord rejects messages over 2000 characters
pub const MAX_DISCORD_MESSAGE: usize = 1900;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rejected with HTTP {0}")]
    Rejected(u16),
}

impl From<ureq::Error> for SinkError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => SinkError::Rejected(code),
            ureq::Error::Transport(t) => SinkError::Transport(t.to_string()),
        }
    }
}

/// Somewhere an alert can be delivered
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;
    fn send(&self, message: &str) -> Result<(), SinkError>;
}

/// Writes alerts to the application log
pub struct LogSink;

impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn send(&self, message: &str) -> Result<(), SinkError> {
        log::warn!("ALERT\n{}", message);
        Ok(())
    }
}

#[derive(Serialize)]
struct DiscordPayload<'a> {
    content: &'a str,
}

pub struct DiscordWebhookSink {
    webhook_url: String,
    timeout: Duration,
}

impl DiscordWebhookSink {
    pub fn new(webhook_url: &str, timeout: Duration) -> Self {
        Self {
            webhook_url: webhook_url.to_string(),
            timeout,
        }
    }
}

impl NotificationSink for DiscordWebhookSink {
    fn name(&self) -> &str {
        "discord"
    }

    fn send(&self, message: &str) -> Result<(), SinkError> {
        let payload = DiscordPayload {
            content: truncate_chars(message, MAX_DISCORD_MESSAGE),
        };
        let body =
            serde_json::to_string(&payload).map_err(|e| SinkError::Transport(e.to_string()))?;

        let response = ureq::post(&self.webhook_url)
            .set("Content-Type", "application/json")
            .timeout(self.timeout)
            .send_string(&body)?;
        log::debug!("Discord webhook answered HTTP {}", response.status());
        Ok(())
    }
}

pub struct TelegramSink {
    bot_token: String,
    chat_id: String,
    timeout: Duration,
}

impl TelegramSink {
    pub fn new(bot_token: &str, chat_id: &str, timeout: Duration) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            timeout,
        }
    }
}

impl NotificationSink for TelegramSink {
    fn name(&self) -> &str {
        "telegram"
    }

    fn send(&self, message: &str) -> Result<(), SinkError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        ureq::post(&url)
            .timeout(self.timeout)
            .send_form(&[("chat_id", self.chat_id.as_str()), ("text", message)])?;
        Ok(())
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// The log sink plus every transport configured in `settings`
pub fn build_sinks(settings: &Settings) -> Vec<Box<dyn NotificationSink>> {
    let timeout = Duration::from_secs(settings.request_timeout_secs);
    let mut sinks: Vec<Box<dyn NotificationSink>> = vec![Box::new(LogSink)];

    if let Some(webhook) = non_blank(&settings.discord_webhook) {
        sinks.push(Box::new(DiscordWebhookSink::new(webhook, timeout)));
    }

    match (
        non_blank(&settings.telegram_bot_token),
        non_blank(&settings.telegram_chat_id),
    ) {
        (Some(token), Some(chat)) => sinks.push(Box::new(TelegramSink::new(token, chat, timeout))),
        (Some(_), None) | (None, Some(_)) => {
            log::warn!("Telegram needs both a bot token and a chat id; sink disabled")
        }
        (None, None) => {}
    }

    sinks
}

/// Longest prefix of `s` with at most `max` characters
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
        assert_eq!(truncate_chars(&"x".repeat(2500), MAX_DISCORD_MESSAGE).len(), 1900);
    }

    #[test]
    fn test_build_sinks_from_settings() {
        let names = |s: &Settings| {
            build_sinks(s)
                .iter()
                .map(|sink| sink.name().to_string())
                .collect::<Vec<_>>()
        };

        assert_eq!(names(&Settings::default()), vec!["log"]);

        let full = Settings {
            discord_webhook: Some("https://discord.test/hook".to_string()),
            telegram_bot_token: Some("token".to_string()),
            telegram_chat_id: Some("42".to_string()),
            ..Settings::default()
        };
        assert_eq!(names(&full), vec!["log", "discord", "telegram"]);

        let half = Settings {
            telegram_bot_token: Some("token".to_string()),
            discord_webhook: Some("   ".to_string()),
            ..Settings::default()
        };
        assert_eq!(names(&half), vec!["log"]);
    }
}
