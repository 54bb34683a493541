use std::path::PathBuf;

use chisel_contracts::models::Operation;
use chisel_contracts::providers::Provider;

pub type Result<T, E = ChiselError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ChiselError {
    #[error("{0} not set. Please set the env variable before using this adapter.")]
    MissingCredential(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid provider for {operation}: {provider}")]
    InvalidProvider {
        provider: Provider,
        operation: Operation,
    },

    #[error("error calling {provider}: status: {status}, message: {message}")]
    Vendor {
        provider: Provider,
        status: String,
        message: String,
    },

    #[error("unexpected {provider} response: {detail}")]
    UnexpectedResponse { provider: Provider, detail: String },

    #[error("failed to decode image {}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("image encoding failed")]
    Image(#[from] image::ImageError),

    #[error("request to {url} failed")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("base64 decode failed")]
    Base64(#[from] base64::DecodeError),
}

impl ChiselError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ChiselError::InvalidArgument(message.into())
    }

    pub fn unexpected(provider: Provider, detail: impl Into<String>) -> Self {
        ChiselError::UnexpectedResponse {
            provider,
            detail: detail.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ChiselError::Transport { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            ChiselError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chisel_contracts::models::Operation;
    use chisel_contracts::providers::Provider;

    use super::ChiselError;

    #[test]
    fn vendor_error_carries_status_and_message_verbatim() {
        let err = ChiselError::Vendor {
            provider: Provider::StableDiffusionApi,
            status: "error".to_string(),
            message: "Invalid API key".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "error calling stable_diffusion_api: status: error, message: Invalid API key"
        );
    }

    #[test]
    fn invalid_provider_names_operation() {
        let err = ChiselError::InvalidProvider {
            provider: Provider::OpenAi,
            operation: Operation::SuperRes,
        };
        assert_eq!(err.to_string(), "invalid provider for super_res: openai");
    }

    #[test]
    fn only_transport_failures_are_retryable() {
        let io = ChiselError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(io.is_retryable());
        assert!(!ChiselError::invalid("nope").is_retryable());
        assert!(!ChiselError::MissingCredential("HF_API_KEY".to_string()).is_retryable());
    }
}
