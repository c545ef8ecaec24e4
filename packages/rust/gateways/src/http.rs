//! Shared HTTP plumbing for the adapters.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use shopally_shared::{Result, ShopAllyError};

/// User-Agent string for upstream requests.
const USER_AGENT: &str = concat!("ShopAlly/", env!("CARGO_PKG_VERSION"));

/// Longest response body quoted in an error message.
const ERROR_PREVIEW_LEN: usize = 300;

/// Build the HTTP client used by every adapter.
pub(crate) fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|e| ShopAllyError::Network(format!("failed to build HTTP client: {e}")))
}

/// Map a transport error for `service`.
pub(crate) fn transport_error(service: &str, e: reqwest::Error) -> ShopAllyError {
    if e.is_timeout() {
        ShopAllyError::Network(format!("{service}: request timed out"))
    } else {
        ShopAllyError::Network(format!("{service}: {e}"))
    }
}

/// Turn a non-success response into an error, keeping 429 distinguishable.
pub(crate) async fn check_status(service: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = preview(&body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ShopAllyError::RateLimited(format!("{service}: {message}")));
    }
    Err(ShopAllyError::Upstream {
        service,
        status: status.as_u16(),
        message,
    })
}

fn preview(body: &str) -> String {
    match body.char_indices().nth(ERROR_PREVIEW_LEN) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundary() {
        let long = "ብ".repeat(ERROR_PREVIEW_LEN + 5);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), ERROR_PREVIEW_LEN + 3);
        assert_eq!(preview("short"), "short");
    }
}
