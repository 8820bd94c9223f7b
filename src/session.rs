use crate::errors::ConfigError;
use reqwest::Url;
use std::fmt;

/// Opaque token of the authenticated overlay session.
///
/// Captured once (usually from the `token` query parameter of the overlay
/// URL) and never mutated afterwards.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Result<Self, ConfigError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ConfigError::MissingToken);
        }
        Ok(Self(token))
    }

    /// Pulls `?token=` out of an overlay page URL.
    pub fn from_overlay_url(url: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(url).map_err(|e| ConfigError::Invalid {
            reason: format!("overlay url: {e}"),
        })?;
        let token = url
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .ok_or(ConfigError::MissingToken)?;
        Self::new(token)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

// Keep the secret out of logs
impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_disables_session() {
        assert_eq!(SessionToken::new("  "), Err(ConfigError::MissingToken));
    }

    #[test]
    fn token_from_overlay_url() {
        let t = SessionToken::from_overlay_url("https://overlay.example.org/?token=s3cr%2Bt&x=1").unwrap();
        assert_eq!(t.as_str(), "s3cr+t");
        assert_eq!(t.bearer(), "Bearer s3cr+t");
        assert_eq!(format!("{t:?}"), "SessionToken(***)");

        assert_eq!(
            SessionToken::from_overlay_url("https://overlay.example.org/"),
            Err(ConfigError::MissingToken)
        );
    }
}
