//! OAuth2 wiring for the Gmail API hub
//!
//! Token exchange and refresh are handled by `yup-oauth2`; this module only
//! builds the authenticated hub the [`crate::client::GmailMailboxClient`] uses.

use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::path::{Path, PathBuf};

use crate::error::{GmailError, Result};

/// Read/write access without permanent deletion. Covers listing threads and
/// labels and moving threads to trash.
pub const MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Scopes requested when authenticating
pub const REQUIRED_SCOPES: &[&str] = &[MODIFY_SCOPE];

/// Type alias for Gmail Hub to simplify type signatures
pub type GmailHub = Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Where the OAuth client secret and the cached token live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPaths {
    pub credentials: PathBuf,
    pub token_cache: PathBuf,
}

impl Default for AuthPaths {
    fn default() -> Self {
        Self {
            credentials: PathBuf::from("credentials.json"),
            token_cache: PathBuf::from("token.json"),
        }
    }
}

/// Initialize Gmail API hub with OAuth2 authentication
///
/// Uses the installed-app flow, which opens a browser on first use, and
/// persists the token so later runs refresh silently.
pub async fn initialize_gmail_hub(paths: &AuthPaths) -> Result<GmailHub> {
    let secret = yup_oauth2::read_application_secret(&paths.credentials)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to read credentials: {}", e)))?;

    let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
        secret,
        yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
    )
    .persist_tokens_to_disk(&paths.token_cache)
    .build()
    .await
    .map_err(|e| GmailError::AuthError(format!("Failed to build authenticator: {}", e)))?;

    // Fetch once up front so concurrent workers find a cached token
    let _token = auth
        .token(REQUIRED_SCOPES)
        .await
        .map_err(|e| GmailError::AuthError(format!("Failed to obtain token: {}", e)))?;

    let client = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
        .build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()
                .map_err(|e| GmailError::AuthError(format!("Failed to load TLS roots: {}", e)))?
                .https_or_http()
                .enable_http1()
                .build(),
        );

    Ok(Gmail::new(client, auth))
}

/// Restrict the token cache to its owner
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_paths() {
        let paths = AuthPaths::default();
        assert_eq!(paths.credentials, PathBuf::from("credentials.json"));
        assert_eq!(paths.token_cache, PathBuf::from("token.json"));
    }

    #[test]
    fn test_scopes_never_include_permanent_delete() {
        assert_eq!(REQUIRED_SCOPES, &["https://www.googleapis.com/auth/gmail.modify"]);
        assert!(!REQUIRED_SCOPES.contains(&"https://mail.google.com/"));
    }

    #[tokio::test]
    async fn test_missing_credentials_is_auth_error() {
        let paths = AuthPaths {
            credentials: PathBuf::from("/tmp/nonexistent-credentials-98765.json"),
            token_cache: PathBuf::from("/tmp/nonexistent-token-98765.json"),
        };
        let result = initialize_gmail_hub(&paths).await;
        assert!(matches!(result, Err(GmailError::AuthError(_))));
    }

    #[tokio::test]
    async fn test_secure_token_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "test content")
            .await
            .unwrap();

        secure_token_file(temp_file.path()).await.unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = tokio::fs::metadata(temp_file.path()).await.unwrap();
            assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
        }
    }
}
