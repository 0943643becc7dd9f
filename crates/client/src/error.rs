use parley_storage::StorageError;
use parley_webhook::WebhookError;
use snafu::Snafu;

use crate::chat::message::SessionId;
use crate::settings::SettingsError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("chat storage operation failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("message delivery failed on `{stage}`: {source}"))]
    Delivery {
        stage: &'static str,
        source: WebhookError,
    },
    #[snafu(display("no reply arrived for session {session_id}"))]
    ReplyTimedOut {
        stage: &'static str,
        session_id: SessionId,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;

/// Failures that stop the binary before the chat loop starts.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StartupError {
    #[snafu(display("invalid settings on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to open chat storage on `{stage}`: {source}"))]
    OpenStorage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to configure webhook on `{stage}`: {source}"))]
    Webhook {
        stage: &'static str,
        source: WebhookError,
    },
    #[snafu(display("terminal I/O failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
}
