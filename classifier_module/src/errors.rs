#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("missing environment variable: {key}")]
    MissingEnv { key: &'static str },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("classifier API error (status {status}): {body}")]
    Api { status: u16, body: String },
    #[error("classifier returned no message content")]
    EmptyResponse,
    #[error("classifier reply is not the expected JSON object: {source}; raw reply: {raw}")]
    MalformedResponse {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
}
