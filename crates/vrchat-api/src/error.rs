//! Errors returned by the API client.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when talking to the VRChat API.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Request could not be sent, or the response could not be read.
    #[error("request to VRChat API failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// API responded with a non-success status.
    #[error("VRChat API responded to `{endpoint}` with {status}: {body}")]
    Status {
        /// Relative API endpoint.
        endpoint: &'static str,
        /// Response status.
        status: StatusCode,
        /// Response body (may be empty).
        body: String,
    },
    /// Response body is not what the endpoint is documented to return.
    #[error("cannot decode VRChat API response from `{endpoint}`: {source}")]
    Decode {
        /// Relative API endpoint.
        endpoint: &'static str,
        /// Decoding error.
        #[source]
        source: serde_json::Error,
    },
    /// Account has two-factor authentication enabled, but no code was supplied.
    #[error("two-factor authentication is required (supported methods: {methods:?}), but no code was provided")]
    TwoFactorRequired {
        /// Two-factor methods offered by the API, e.g. `totp` or `emailOtp`.
        methods: Vec<String>,
    },
    /// Two-factor code was not accepted.
    #[error("two-factor code was rejected")]
    TwoFactorRejected,
    /// Paginated endpoint kept returning full pages.
    #[error("pagination of VRChat API endpoint `{endpoint}` did not terminate after {pages} pages")]
    Pagination {
        /// Relative API endpoint.
        endpoint: &'static str,
        /// Number of pages fetched before giving up.
        pages: usize,
    },
}
