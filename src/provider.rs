use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// External services a tenant can connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// CRM
    Pipedrive,
    /// SMS and voice
    Twilio,
    /// Email campaigns
    Mailchimp,
    /// Accounting
    Quickbooks,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::Pipedrive,
        Provider::Twilio,
        Provider::Mailchimp,
        Provider::Quickbooks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Pipedrive => "pipedrive",
            Provider::Twilio => "twilio",
            Provider::Mailchimp => "mailchimp",
            Provider::Quickbooks => "quickbooks",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider name outside the known set.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown provider '{}'", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}
