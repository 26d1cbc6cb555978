use anyhow::{Context, Result, anyhow};
use log::debug;
use reqwest::{Client, Response, StatusCode};
use std::{fmt, time::Duration};

/// Failure of a request against a remote release repository
#[derive(Debug)]
pub enum FetchError {
    /// The remote refused the request because of its rate limit
    RateLimited,
    /// Any other transport or status failure
    Failed(anyhow::Error),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::RateLimited => write!(f, "rate limited"),
            FetchError::Failed(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Failed(anyhow!(e))
    }
}

/// Create an HTTPS client with a request timeout and an identifying user agent
///
/// # Arguments
/// * `timeout` - Upper bound for a whole request, including the body
///
/// # Returns
/// * `Ok(Client)` - The configured client
/// * `Err` - If the TLS backend cannot be initialised
pub fn https_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to create https client")
}

fn is_rate_limited(res: &Response) -> bool {
    match res.status() {
        StatusCode::TOO_MANY_REQUESTS => true,
        StatusCode::FORBIDDEN => res
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0"),
        _ => false,
    }
}

/// Handle HTTP response by checking status and extracting the body
///
/// # Arguments
/// * `res` - The HTTP response to handle
/// * `context_msg` - Context message describing the request (e.g., "tag listing")
///
/// # Returns
/// * `Ok(Vec<u8>)` - The response body if the status is successful
/// * `Err(FetchError::RateLimited)` - If the remote signalled its rate limit
/// * `Err(FetchError::Failed)` - If the status is not successful or reading the body fails
pub async fn handle_http_response(res: Response, context_msg: &str) -> Result<Vec<u8>, FetchError> {
    if is_rate_limited(&res) {
        debug!("{context_msg} hit the rate limit");
        return Err(FetchError::RateLimited);
    }

    let status = res.status();
    let body = res
        .bytes()
        .await
        .context("failed to read response body")
        .map_err(FetchError::Failed)?;

    if !status.is_success() {
        return Err(FetchError::Failed(anyhow!(
            "{context_msg} failed with status {status} and body: {}",
            String::from_utf8_lossy(&body)
        )));
    }

    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_timeout() {
        assert!(https_client(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn fetch_error_display() {
        assert_eq!(FetchError::RateLimited.to_string(), "rate limited");
        let failed = FetchError::Failed(anyhow!("boom").context("tag listing"));
        assert_eq!(failed.to_string(), "tag listing: boom");
    }
}
