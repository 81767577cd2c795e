//! Messaging channels.

pub mod traits;
pub mod whatsapp;

pub use traits::{Channel, InboundMessage};
pub use whatsapp::{verify_signature, WhatsAppChannel};

use crate::config::ChannelsConfig;

/// Build the WhatsApp channel if it is configured and complete.
///
/// An incomplete section is logged and treated as absent so the gateway can
/// still serve uploads and health checks.
pub fn create_whatsapp_channel(config: &ChannelsConfig) -> Option<WhatsAppChannel> {
    let wa = config.whatsapp.as_ref()?;
    match WhatsAppChannel::from_config(wa) {
        Ok(channel) => Some(channel),
        Err(e) => {
            tracing::warn!("WhatsApp channel disabled: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WhatsAppConfig;

    #[test]
    fn no_section_means_no_channel() {
        assert!(create_whatsapp_channel(&ChannelsConfig::default()).is_none());
    }

    #[test]
    fn incomplete_section_means_no_channel() {
        let config = ChannelsConfig {
            whatsapp: Some(WhatsAppConfig::default()),
        };
        assert!(create_whatsapp_channel(&config).is_none());
    }

    #[test]
    fn complete_section_builds_channel() {
        let config = ChannelsConfig {
            whatsapp: Some(WhatsAppConfig {
                access_token: Some("tok".into()),
                phone_number_id: Some("123".into()),
                verify_token: Some("ver".into()),
                ..WhatsAppConfig::default()
            }),
        };
        let channel = create_whatsapp_channel(&config).unwrap();
        assert_eq!(
            channel.verify_subscription(Some("subscribe"), Some("ver"), Some("42")),
            Some("42".to_string())
        );
    }
}
