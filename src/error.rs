use reqwest::StatusCode;

/// Failures of the VRChat API adapter.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthorized: credentials or session were rejected")]
    Unauthorized,
    #[error("unsupported two-factor method(s): {}", .0.join(", "))]
    UnsupportedSecondFactor(Vec<String>),
    #[error("two-factor code was rejected")]
    SecondFactorRejected,
    #[error("could not obtain a two-factor code: {0}")]
    SecondFactorCode(String),
    #[error("request failed with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}
