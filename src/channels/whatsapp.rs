//! WhatsApp channel over the Meta Cloud API.
//!
//! Inbound messages arrive on the gateway webhook (`/whatsapp`); outbound
//! replies are posted to the Graph API `messages` endpoint.

use super::traits::{Channel, InboundMessage};
use crate::config::WhatsAppConfig;
use anyhow::Context;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct WhatsAppChannel {
    access_token: String,
    phone_number_id: String,
    verify_token: String,
    allowed_numbers: Vec<String>,
    api_base_url: String,
    client: Client,
}

impl WhatsAppChannel {
    pub fn new(
        access_token: String,
        phone_number_id: String,
        verify_token: String,
        allowed_numbers: Vec<String>,
        api_base_url: &str,
    ) -> Self {
        Self {
            access_token,
            phone_number_id,
            verify_token,
            allowed_numbers,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Build the channel from `[channels_config.whatsapp]`.
    pub fn from_config(config: &WhatsAppConfig) -> anyhow::Result<Self> {
        let field = |value: &Option<String>, name: &str| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .with_context(|| format!("channels_config.whatsapp.{name} is required"))
        };

        Ok(Self::new(
            field(&config.access_token, "access_token")?,
            field(&config.phone_number_id, "phone_number_id")?,
            field(&config.verify_token, "verify_token")?,
            config.allowed_numbers.clone(),
            &config.api_base_url,
        ))
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.api_base_url, self.phone_number_id)
    }

    /// Answer Meta's webhook subscription handshake.
    ///
    /// Returns the challenge to echo back when `mode` is `subscribe` and the
    /// token matches, `None` otherwise.
    pub fn verify_subscription(
        &self,
        mode: Option<&str>,
        token: Option<&str>,
        challenge: Option<&str>,
    ) -> Option<String> {
        let token_ok = token.is_some_and(|t| {
            crate::security::constant_time_eq(t.as_bytes(), self.verify_token.as_bytes())
        });
        if mode == Some("subscribe") && token_ok {
            challenge.map(str::to_string)
        } else {
            None
        }
    }

    /// `"*"` allows everyone; an empty list allows no one.
    pub fn is_number_allowed(&self, phone: &str) -> bool {
        self.allowed_numbers.iter().any(|n| n == "*" || n == phone)
    }

    /// Extract text messages from a Cloud API webhook payload.
    ///
    /// Non-text messages, status updates and senders outside
    /// `allowed_numbers` are skipped.
    pub fn parse_webhook_payload(&self, payload: &serde_json::Value) -> Vec<InboundMessage> {
        let mut messages = Vec::new();

        let Some(entries) = payload.get("entry").and_then(|e| e.as_array()) else {
            return messages;
        };

        for entry in entries {
            let Some(changes) = entry.get("changes").and_then(|c| c.as_array()) else {
                continue;
            };

            for change in changes {
                let Some(items) = change
                    .get("value")
                    .and_then(|v| v.get("messages"))
                    .and_then(|m| m.as_array())
                else {
                    continue;
                };

                for msg in items {
                    let Some(from) = msg.get("from").and_then(|f| f.as_str()) else {
                        continue;
                    };

                    let normalized_from = if from.starts_with('+') {
                        from.to_string()
                    } else {
                        format!("+{from}")
                    };

                    if !self.is_number_allowed(&normalized_from) {
                        tracing::warn!(
                            sender = %crate::security::redact(&normalized_from),
                            "WhatsApp: ignoring message from unauthorized number. \
                             Add it to channels_config.whatsapp.allowed_numbers to accept it."
                        );
                        continue;
                    }

                    let content = if msg.get("type").and_then(|t| t.as_str()) == Some("text") {
                        msg.get("text")
                            .and_then(|t| t.get("body"))
                            .and_then(|b| b.as_str())
                            .unwrap_or("")
                            .to_string()
                    } else {
                        tracing::debug!("WhatsApp: skipping non-text message from {from}");
                        continue;
                    };

                    if content.trim().is_empty() {
                        continue;
                    }

                    let timestamp = msg
                        .get("timestamp")
                        .and_then(|t| t.as_str())
                        .and_then(|t| t.parse::<u64>().ok())
                        .unwrap_or_else(|| {
                            std::time::SystemTime::now()
                                .duration_since(std::time::UNIX_EPOCH)
                                .map_or(0, |d| d.as_secs())
                        });

                    let id = msg
                        .get("id")
                        .and_then(|i| i.as_str())
                        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);

                    messages.push(InboundMessage {
                        id,
                        sender: normalized_from.clone(),
                        reply_target: normalized_from,
                        content,
                        channel: "whatsapp".to_string(),
                        timestamp,
                    });
                }
            }
        }

        messages
    }
}

/// Verify Meta's `X-Hub-Signature-256` header (`sha256=<hex>`) over the raw body.
pub fn verify_signature(app_secret: &str, body: &[u8], signature_header: &str) -> bool {
    let Some(hex_sig) = signature_header.strip_prefix("sha256=") else {
        return false;
    };

    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };

    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, recipient: &str, text: &str) -> anyhow::Result<()> {
        // Cloud API expects the number without the leading '+'
        let to = recipient.strip_prefix('+').unwrap_or(recipient);

        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": text
            }
        });

        let resp = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error_body = resp.text().await.unwrap_or_default();
            let sanitized = crate::providers::sanitize_api_error(&error_body);
            tracing::error!("WhatsApp send failed: {status} - {sanitized}");
            anyhow::bail!("WhatsApp API error: {status}");
        }

        Ok(())
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/{}", self.api_base_url, self.phone_number_id);
        self.client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_channel() -> WhatsAppChannel {
        WhatsAppChannel::new(
            "test-token".into(),
            "123456789".into(),
            "verify-me".into(),
            vec!["+237600000000".into()],
            "https://graph.facebook.com/v21.0",
        )
    }

    fn make_wildcard_channel() -> WhatsAppChannel {
        WhatsAppChannel::new(
            "test-token".into(),
            "123456789".into(),
            "verify-me".into(),
            vec!["*".into()],
            "https://graph.facebook.com/v21.0/",
        )
    }

    fn text_payload(from: &str, body: &str) -> serde_json::Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "messaging_product": "whatsapp",
                        "messages": [{
                            "from": from,
                            "id": "wamid.abc",
                            "timestamp": "1699999999",
                            "type": "text",
                            "text": { "body": body }
                        }]
                    },
                    "field": "messages"
                }]
            }]
        })
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn channel_name() {
        assert_eq!(make_channel().name(), "whatsapp");
    }

    #[test]
    fn messages_url_uses_phone_number_id() {
        assert_eq!(
            make_wildcard_channel().messages_url(),
            "https://graph.facebook.com/v21.0/123456789/messages"
        );
    }

    #[test]
    fn from_config_requires_credentials() {
        let mut config = WhatsAppConfig {
            access_token: Some("tok".into()),
            phone_number_id: Some("123".into()),
            verify_token: Some("  ".into()),
            ..WhatsAppConfig::default()
        };
        let err = WhatsAppChannel::from_config(&config).err().unwrap().to_string();
        assert!(err.contains("verify_token"));

        config.verify_token = Some("v".into());
        assert!(WhatsAppChannel::from_config(&config).is_ok());
    }

    #[test]
    fn subscription_echoes_challenge_on_match() {
        let ch = make_channel();
        assert_eq!(
            ch.verify_subscription(Some("subscribe"), Some("verify-me"), Some("1158201444")),
            Some("1158201444".to_string())
        );
    }

    #[test]
    fn subscription_rejects_wrong_token_or_mode() {
        let ch = make_channel();
        assert!(ch
            .verify_subscription(Some("subscribe"), Some("nope"), Some("c"))
            .is_none());
        assert!(ch
            .verify_subscription(Some("unsubscribe"), Some("verify-me"), Some("c"))
            .is_none());
        assert!(ch.verify_subscription(None, None, Some("c")).is_none());
    }

    #[test]
    fn number_allowed_exact_and_wildcard() {
        let ch = make_channel();
        assert!(ch.is_number_allowed("+237600000000"));
        assert!(!ch.is_number_allowed("+15550000000"));
        assert!(make_wildcard_channel().is_number_allowed("+15550000000"));
    }

    #[test]
    fn number_denied_when_list_empty() {
        let ch = WhatsAppChannel::new(
            "t".into(),
            "1".into(),
            "v".into(),
            vec![],
            "https://graph.facebook.com/v21.0",
        );
        assert!(!ch.is_number_allowed("+237600000000"));
        assert!(ch
            .parse_webhook_payload(&text_payload("237600000000", "hi"))
            .is_empty());
    }

    #[test]
    fn parse_valid_text_message() {
        let ch = make_channel();
        let msgs = ch.parse_webhook_payload(&text_payload("237600000000", "Bonjour"));
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].sender, "+237600000000");
        assert_eq!(msgs[0].reply_target, "+237600000000");
        assert_eq!(msgs[0].content, "Bonjour");
        assert_eq!(msgs[0].channel, "whatsapp");
        assert_eq!(msgs[0].timestamp, 1_699_999_999);
        assert_eq!(msgs[0].id, "wamid.abc");
    }

    #[test]
    fn parse_skips_unauthorized_sender() {
        let ch = make_channel();
        assert!(ch
            .parse_webhook_payload(&text_payload("15551234567", "hi"))
            .is_empty());
    }

    #[test]
    fn parse_skips_non_text_and_blank_messages() {
        let ch = make_wildcard_channel();
        let payload = json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [
                            {"from": "1", "type": "image", "image": {"id": "img"}},
                            {"from": "2", "type": "text", "text": {"body": "   "}},
                            {"from": "3", "type": "text", "text": {"body": "real"}}
                        ]
                    }
                }]
            }]
        });
        let msgs = ch.parse_webhook_payload(&payload);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].sender, "+3");
    }

    #[test]
    fn parse_ignores_status_updates_and_garbage() {
        let ch = make_wildcard_channel();
        let status = json!({
            "entry": [{"changes": [{"value": {"statuses": [{"id": "wamid", "status": "read"}]}}]}]
        });
        assert!(ch.parse_webhook_payload(&status).is_empty());
        assert!(ch.parse_webhook_payload(&json!({})).is_empty());
        assert!(ch.parse_webhook_payload(&json!({"entry": "nope"})).is_empty());
    }

    #[test]
    fn parse_multiple_entries() {
        let ch = make_wildcard_channel();
        let payload = json!({
            "entry": [
                {"changes": [{"value": {"messages": [
                    {"from": "111", "type": "text", "text": {"body": "first"}}
                ]}}]},
                {"changes": [{"value": {"messages": [
                    {"from": "222", "type": "text", "text": {"body": "second"}}
                ]}}]}
            ]
        });
        let msgs = ch.parse_webhook_payload(&payload);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, "first");
        assert_eq!(msgs[1].content, "second");
        assert!(msgs[0].timestamp > 0);
    }

    #[test]
    fn signature_valid() {
        let body = br#"{"entry":[]}"#;
        let header = sign("app-secret", body);
        assert!(verify_signature("app-secret", body, &header));
    }

    #[test]
    fn signature_rejects_tampering() {
        let header = sign("app-secret", b"original");
        assert!(!verify_signature("app-secret", b"tampered", &header));
        assert!(!verify_signature("other-secret", b"original", &header));
    }

    #[test]
    fn signature_rejects_malformed_header() {
        assert!(!verify_signature("s", b"body", ""));
        assert!(!verify_signature("s", b"body", "sha1=abcd"));
        assert!(!verify_signature("s", b"body", "sha256=not-hex"));
    }
}
