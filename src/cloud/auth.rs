//! OAuth access token for Google Cloud REST calls.

use tokio::process::Command;
use tracing::debug;

use super::CloudError;

/// Token override, checked before asking `gcloud`.
pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Bearer token from `$GOOGLE_OAUTH_ACCESS_TOKEN` or
/// `gcloud auth print-access-token`.
pub async fn access_token() -> Result<String, CloudError> {
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        let token = token.trim().to_string();
        if !token.is_empty() {
            debug!("Using access token from {}", TOKEN_ENV);
            return Ok(token);
        }
    }

    let output = Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .map_err(|e| CloudError::Auth(format!("cannot run gcloud: {e}")))?;
    if !output.status.success() {
        return Err(CloudError::Auth(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(CloudError::Auth("gcloud printed an empty token".to_string()));
    }
    Ok(token)
}
