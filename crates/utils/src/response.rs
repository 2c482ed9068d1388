use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Envelope returned by every API endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct ApiResponse<T, E = T> {
    success: bool,
    data: Option<T>,
    error_data: Option<E>,
    message: Option<String>,
}

impl<T, E> ApiResponse<T, E> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_data: None,
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_data: None,
            message: Some(message.into()),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error_data: None,
            message: Some(message.to_string()),
        }
    }

    /// Error carrying a machine readable payload (e.g. a failure code) next to the message
    pub fn error_with_data(data: E, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error_data: Some(data),
            message: Some(message.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn error_data(&self) -> Option<&E> {
        self.error_data.as_ref()
    }
}
