//! Data types exchanged with the API.

use serde::Deserialize;

use std::fmt;

/// Account credentials used to log in.
///
/// `Debug` output never contains the password or the two-factor code.
#[derive(Clone)]
pub struct Credentials {
    pub(crate) username: String,
    pub(crate) password: String,
    pub(crate) totp: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credentials")
            .field("username", &self.username)
            .field("has_totp", &self.totp.is_some())
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Creates credentials without a two-factor code.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            totp: None,
        }
    }

    /// Sets the one-time code used if the account requires two-factor authentication.
    #[must_use]
    pub fn with_totp(mut self, code: impl Into<String>) -> Self {
        self.totp = Some(code.into());
        self
    }

    /// Returns the username.
    pub fn username(&self) -> &str {
        &self.username
    }
}

/// Logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    /// User ID, e.g. `usr_c1644b5b-3ca4-45b4-97c6-a2a0de70d469`.
    pub id: String,
    /// Display name.
    pub display_name: String,
}

/// Friend of the logged-in user together with their presence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Friend {
    /// Display name.
    pub display_name: String,
    /// Location identifier, e.g. `wrld_ba913a96-fac4-4048-a062-9aa5db092812:12345`, `private`
    /// or `offline`.
    #[serde(default)]
    pub location: String,
    /// Presence status.
    pub status: UserStatus,
    /// Free-form status set by the user.
    #[serde(default)]
    pub status_description: String,
}

/// Presence status of a user.
///
/// Statuses unknown to this crate are preserved verbatim in [`Self::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum UserStatus {
    /// `active`
    Active,
    /// `join me`
    JoinMe,
    /// `ask me`
    AskMe,
    /// `busy`
    Busy,
    /// `offline`
    Offline,
    /// Any other status string.
    Other(String),
}

impl From<String> for UserStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "active" => Self::Active,
            "join me" => Self::JoinMe,
            "ask me" => Self::AskMe,
            "busy" => Self::Busy,
            "offline" => Self::Offline,
            _ => Self::Other(raw),
        }
    }
}

impl UserStatus {
    /// Returns the status as it is represented by the API.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::JoinMe => "join me",
            Self::AskMe => "ask me",
            Self::Busy => "busy",
            Self::Offline => "offline",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum LoginResponse {
    TwoFactorRequired {
        #[serde(rename = "requiresTwoFactorAuth")]
        methods: Vec<String>,
    },
    User(CurrentUser),
}

#[derive(Debug, Deserialize)]
pub(crate) struct VerifyResponse {
    pub verified: bool,
}
