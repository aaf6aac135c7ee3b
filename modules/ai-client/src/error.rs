use thiserror::Error;

#[derive(Error, Debug)]
pub enum AiError {
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The model returned nothing a caller can act on: no structured tool
    /// call, no parseable text. Distinct from a malformed payload so callers
    /// can tell "empty" from "garbled" in their failure records.
    #[error("no usable output in model response")]
    NoUsableOutput,

    #[error("malformed structured output: {0}")]
    Malformed(String),

    #[error("request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}
