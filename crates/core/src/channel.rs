//! Messaging channel taxonomy
//!
//! The CRM reports the originating channel as a free-form `source` string;
//! everything downstream works with the normalized [`Channel`] enum.

use serde::{Deserialize, Serialize};

/// Normalized messaging channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Channel {
    #[default]
    WhatsApp,
    Sms,
    Facebook,
    Instagram,
    GoogleBusiness,
    LiveChat,
}

impl Channel {
    /// Wire name expected by the CRM send API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WhatsApp => "WhatsApp",
            Self::Sms => "SMS",
            Self::Facebook => "FB",
            Self::Instagram => "IG",
            Self::GoogleBusiness => "GMB",
            Self::LiveChat => "Live_Chat",
        }
    }

    /// Normalize a raw `source` string. Unknown sources fall back to WhatsApp,
    /// the dominant channel for this deployment.
    pub fn from_source(source: &str) -> Self {
        let s = source.to_lowercase();
        if s.contains("whatsapp") || s.contains("whats") {
            Self::WhatsApp
        } else if s.contains("facebook") || s.contains("fb") || s.contains("messenger") {
            Self::Facebook
        } else if s.contains("instagram") || s.contains("ig") {
            Self::Instagram
        } else if s.contains("sms") {
            Self::Sms
        } else if s.contains("gmb") || s.contains("google") {
            Self::GoogleBusiness
        } else {
            Self::WhatsApp
        }
    }

    /// Phone-number based channels where the CRM accepts a contact-id send
    /// without a native conversation id.
    pub fn is_phone_based(&self) -> bool {
        matches!(self, Self::WhatsApp | Self::Sms)
    }

    /// Social channels with a hard outbound message length limit.
    pub fn hard_length_limit(&self) -> Option<usize> {
        match self {
            Self::Facebook | Self::Instagram => Some(1500),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_normalization() {
        assert_eq!(Channel::from_source("whatsapp_business"), Channel::WhatsApp);
        assert_eq!(Channel::from_source("Facebook Messenger"), Channel::Facebook);
        assert_eq!(Channel::from_source("instagram_dm"), Channel::Instagram);
        assert_eq!(Channel::from_source("SMS"), Channel::Sms);
        assert_eq!(Channel::from_source("google business"), Channel::GoogleBusiness);
        assert_eq!(Channel::from_source("something else"), Channel::WhatsApp);
    }

    #[test]
    fn social_limits() {
        assert_eq!(Channel::Instagram.hard_length_limit(), Some(1500));
        assert_eq!(Channel::WhatsApp.hard_length_limit(), None);
        assert!(Channel::Sms.is_phone_based());
        assert!(!Channel::Facebook.is_phone_based());
    }
}
