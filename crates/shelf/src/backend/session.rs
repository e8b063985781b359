//! Session tokens for authenticated backends
//!
//! Sign-in itself lives outside the sync engine. Backends only need a bearer
//! token, a way to refresh it when the server rejects it, and the id of the
//! signed-in user. Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{SyncError, SyncResult};

/// Token source for an authenticated backend
pub trait Session: Send + Sync {
    /// Current bearer token; `BackendNotConfigured` when signed out
    fn access_token(&self) -> SyncResult<String>;

    /// Obtain a fresh token after the server rejected the current one;
    /// `AuthExpired` when that isn't possible
    fn refresh(&self) -> SyncResult<String>;

    /// Identifier of the signed-in user
    fn user_id(&self) -> Option<String>;
}

/// A fixed token that can't be refreshed
pub struct StaticSession {
    token: Option<String>,
    user_id: Option<String>,
}

impl StaticSession {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            user_id: None,
        }
    }

    /// A session with no token; every request fails with `BackendNotConfigured`
    pub fn signed_out() -> Self {
        Self {
            token: None,
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

impl Session for StaticSession {
    fn access_token(&self) -> SyncResult<String> {
        self.token.clone().ok_or(SyncError::BackendNotConfigured)
    }

    fn refresh(&self) -> SyncResult<String> {
        Err(SyncError::AuthExpired)
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}

/// Stored token data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds
    pub expires_at: Option<i64>,
    pub user_id: Option<String>,
}

/// Token response from a refresh endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
    user: Option<TokenUser>,
}

#[derive(Debug, Deserialize)]
struct TokenUser {
    id: String,
}

/// File-backed session that refreshes through a token endpoint
///
/// The token file lives in the Shelf config directory. Refreshing POSTs
/// `{"refresh_token": ...}` to `refresh_url` and persists the response.
pub struct StoredSession {
    token_path: PathBuf,
    refresh_url: String,
    api_key: Option<String>,
    cached: Mutex<Option<StoredToken>>,
}

impl StoredSession {
    /// Refresh tokens this close to expiry instead of sending them
    const EXPIRY_MARGIN_SECS: i64 = 300;

    /// Create a session whose tokens live in `<config dir>/<name>-session.json`
    pub fn new(name: &str, refresh_url: impl Into<String>) -> Result<Self> {
        let token_path = config::config_path(&format!("{}-session.json", name))
            .context("Could not determine config directory")?;
        Ok(Self::at_path(token_path, refresh_url))
    }

    /// Create a session backed by an explicit token file
    pub fn at_path(token_path: PathBuf, refresh_url: impl Into<String>) -> Self {
        Self {
            token_path,
            refresh_url: refresh_url.into(),
            api_key: None,
            cached: Mutex::new(None),
        }
    }

    /// Send an `apikey` header with refresh requests (managed database auth)
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Persist tokens obtained by sign-in
    pub fn store(&self, token: StoredToken) -> Result<()> {
        config::save_json_file(&self.token_path, &token)?;
        *self.cached.lock().unwrap() = Some(token);
        Ok(())
    }

    /// Check if a token is stored
    pub fn is_signed_in(&self) -> bool {
        self.load_token().is_ok()
    }

    /// Clear stored tokens (logout)
    pub fn logout(&self) -> Result<()> {
        *self.cached.lock().unwrap() = None;
        if self.token_path.exists() {
            fs::remove_file(&self.token_path)?;
        }
        Ok(())
    }

    fn load_token(&self) -> Result<StoredToken> {
        if let Some(token) = self.cached.lock().unwrap().clone() {
            return Ok(token);
        }
        let token: StoredToken = config::load_json_file(&self.token_path)?;
        *self.cached.lock().unwrap() = Some(token.clone());
        Ok(token)
    }

    fn refresh_with(&self, current: &StoredToken) -> SyncResult<String> {
        let Some(refresh_token) = current.refresh_token.as_deref() else {
            return Err(SyncError::AuthExpired);
        };

        debug!("Refreshing session token at {}", self.refresh_url);
        let mut request = ureq::post(&self.refresh_url);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key.as_str());
        }

        let response = request.send_json(serde_json::json!({ "refresh_token": refresh_token }));
        let mut response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("Session refresh failed: {}", e);
                return Err(SyncError::AuthExpired);
            }
        };

        let token: TokenResponse = response.body_mut().read_json().map_err(|e| {
            warn!("Failed to parse refresh response: {}", e);
            SyncError::AuthExpired
        })?;

        let stored = StoredToken {
            access_token: token.access_token,
            // Preserve the refresh token if not returned
            refresh_token: token
                .refresh_token
                .or_else(|| current.refresh_token.clone()),
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
            user_id: token
                .user
                .map(|u| u.id)
                .or_else(|| current.user_id.clone()),
        };
        let access_token = stored.access_token.clone();
        self.store(stored)?;
        Ok(access_token)
    }
}

impl Session for StoredSession {
    fn access_token(&self) -> SyncResult<String> {
        let token = self
            .load_token()
            .map_err(|_| SyncError::BackendNotConfigured)?;

        match token.expires_at {
            Some(expires_at)
                if expires_at <= chrono::Utc::now().timestamp() + Self::EXPIRY_MARGIN_SECS =>
            {
                self.refresh_with(&token)
            }
            _ => Ok(token.access_token),
        }
    }

    fn refresh(&self) -> SyncResult<String> {
        let token = self
            .load_token()
            .map_err(|_| SyncError::BackendNotConfigured)?;
        self.refresh_with(&token)
    }

    fn user_id(&self) -> Option<String> {
        self.load_token().ok().and_then(|t| t.user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_session() {
        let session = StaticSession::new("abc").with_user_id("u1");
        assert_eq!(session.access_token(), Ok("abc".to_string()));
        assert_eq!(session.refresh(), Err(SyncError::AuthExpired));
        assert_eq!(session.user_id().as_deref(), Some("u1"));

        let signed_out = StaticSession::signed_out();
        assert_eq!(signed_out.access_token(), Err(SyncError::BackendNotConfigured));
    }

    #[test]
    fn test_stored_session_reads_saved_token() {
        let dir = tempfile::tempdir().unwrap();
        let session = StoredSession::at_path(dir.path().join("rest-session.json"), "http://unused");
        assert!(!session.is_signed_in());
        assert_eq!(session.access_token(), Err(SyncError::BackendNotConfigured));

        session
            .store(StoredToken {
                access_token: "tok".to_string(),
                refresh_token: None,
                expires_at: None,
                user_id: Some("user-1".to_string()),
            })
            .unwrap();

        // A fresh instance reads the file written by the first one
        let reopened =
            StoredSession::at_path(dir.path().join("rest-session.json"), "http://unused");
        assert!(reopened.is_signed_in());
        assert_eq!(reopened.access_token(), Ok("tok".to_string()));
        assert_eq!(reopened.user_id().as_deref(), Some("user-1"));
    }

    #[test]
    fn test_expired_token_without_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let session = StoredSession::at_path(dir.path().join("s.json"), "http://unused");
        session
            .store(StoredToken {
                access_token: "old".to_string(),
                refresh_token: None,
                expires_at: Some(0),
                user_id: None,
            })
            .unwrap();

        assert_eq!(session.access_token(), Err(SyncError::AuthExpired));
    }

    #[test]
    fn test_logout() {
        let dir = tempfile::tempdir().unwrap();
        let session = StoredSession::at_path(dir.path().join("s.json"), "http://unused");
        session
            .store(StoredToken {
                access_token: "tok".to_string(),
                refresh_token: Some("r".to_string()),
                expires_at: None,
                user_id: None,
            })
            .unwrap();
        session.logout().unwrap();
        assert!(!session.is_signed_in());
    }
}
