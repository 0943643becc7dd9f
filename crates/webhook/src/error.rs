use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum WebhookError {
    #[snafu(display("webhook URL is not configured"))]
    MissingUrl { stage: &'static str },
    #[snafu(display("webhook URL '{url}' is invalid: {details}"))]
    InvalidUrl {
        stage: &'static str,
        url: String,
        details: String,
    },
    #[snafu(display("failed to build webhook HTTP client on `{stage}`: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("webhook request failed on `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("webhook request failed with status {status}: {reason}"))]
    Status {
        stage: &'static str,
        status: u16,
        reason: String,
    },
}

pub type WebhookResult<T> = Result<T, WebhookError>;
