use prdforge_core::Table;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("failed to decode {table} row: {source}")]
    Decode {
        table: Table,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store returned no rows from {0}")]
    EmptyResult(Table),

    #[error("store is not configured: {0}")]
    Config(String),

    #[error("unsupported image type (expected JPEG, PNG, GIF or WebP)")]
    UnsupportedImage,

    #[error("image is {size} bytes, limit is {max}")]
    ImageTooLarge { size: usize, max: usize },

    #[error("image is {width}x{height}, each side must be between 1 and {max}")]
    ImageDimensions { width: u32, height: u32, max: u32 },

    #[error("image processing failed: {0}")]
    Image(#[from] image::ImageError),
}

impl StoreError {
    /// Map a non-success HTTP status from the backend.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => StoreError::Unauthorized(body),
            404 => StoreError::NotFound(body),
            409 => StoreError::Conflict(body),
            _ => StoreError::Http { status, body },
        }
    }

    /// Short text suitable for a toast or banner.
    pub fn user_message(&self) -> String {
        match self {
            StoreError::Network(_) => "Could not reach the server. Check your connection.".into(),
            StoreError::Timeout => "The server took too long to respond.".into(),
            StoreError::Unauthorized(_) => "You are not allowed to do that. Try signing in again.".into(),
            StoreError::NotFound(_) | StoreError::EmptyResult(_) => {
                "That item no longer exists.".into()
            }
            StoreError::Conflict(_) => "That item was changed elsewhere.".into(),
            StoreError::UnsupportedImage
            | StoreError::ImageTooLarge { .. }
            | StoreError::ImageDimensions { .. } => self.to_string(),
            _ => "Something went wrong while saving.".into(),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else if let Some(status) = e.status() {
            StoreError::from_status(status.as_u16(), e.to_string())
        } else {
            StoreError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(StoreError::from_status(401, String::new()), StoreError::Unauthorized(_)));
        assert!(matches!(StoreError::from_status(403, String::new()), StoreError::Unauthorized(_)));
        assert!(matches!(StoreError::from_status(404, String::new()), StoreError::NotFound(_)));
        assert!(matches!(StoreError::from_status(409, String::new()), StoreError::Conflict(_)));
        assert!(matches!(
            StoreError::from_status(500, "boom".into()),
            StoreError::Http { status: 500, .. }
        ));
    }
}
