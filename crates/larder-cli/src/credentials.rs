use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "larder";

/// A user's API token in the OS keychain.
pub struct StoredToken {
    entry: Entry,
}

impl StoredToken {
    pub fn for_user(username: &str) -> Result<Self> {
        let entry = Entry::new(SERVICE_NAME, username)
            .with_context(|| format!("Failed to open keychain entry for {}", username))?;
        Ok(Self { entry })
    }

    pub fn save(&self, token: &str) -> Result<()> {
        self.entry
            .set_password(token)
            .context("Failed to store token in keychain")
    }

    /// `None` when no token has been stored for this user.
    pub fn load(&self) -> Result<Option<String>> {
        match self.entry.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read token from keychain"),
        }
    }

    /// Returns whether a token was there to remove.
    pub fn forget(&self) -> Result<bool> {
        match self.entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e).context("Failed to delete token from keychain"),
        }
    }
}

/// Clean up a pasted token. A full `Bearer <token>` value is accepted too.
pub fn normalize_token(raw: &str) -> Result<String> {
    let token = raw.trim_start();
    let token = token
        .strip_prefix("Bearer ")
        .or_else(|| token.strip_prefix("bearer "))
        .unwrap_or(token)
        .trim();
    if token.is_empty() {
        anyhow::bail!("Token cannot be empty");
    }
    if token.chars().any(char::is_whitespace) {
        anyhow::bail!("Token cannot contain whitespace");
    }
    Ok(token.to_string())
}
