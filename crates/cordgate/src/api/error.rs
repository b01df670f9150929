//! REST error types.

use thiserror::Error;

/// Map a non-success response to an [`ApiError`], reading the body as the
/// message. Returns the response untouched when it succeeded.
pub async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok());
        return Err(ApiError::RateLimit { retry_after });
    }
    let message = response.text().await.unwrap_or_default();
    Err(ApiError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Errors from REST calls.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited (429)
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimit { retry_after: Option<f64> },

    /// Request URL could not be built
    #[error("invalid request url: {0}")]
    Url(#[from] url::ParseError),

    /// The token cannot be used as a header value
    #[error("bot token contains invalid header characters")]
    InvalidToken,
}
