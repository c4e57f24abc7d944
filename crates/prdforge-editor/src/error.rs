use prdforge_core::CoreError;
use prdforge_store::StoreError;
use prdforge_suggest::GatewayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("{0}")]
    Validation(String),
}

impl EditorError {
    pub fn user_message(&self) -> String {
        match self {
            EditorError::Core(e) => e.to_string(),
            EditorError::Store(e) => e.user_message(),
            EditorError::Gateway(e) => e.user_message().to_string(),
            EditorError::Validation(msg) => msg.clone(),
        }
    }

    /// Raised before anything was sent to the backend.
    pub fn is_validation(&self) -> bool {
        matches!(self, EditorError::Core(_) | EditorError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_come_from_the_wrapped_error() {
        let e = EditorError::from(GatewayError::Timeout);
        assert!(e.user_message().contains("too long"));
        assert!(!e.is_validation());

        let e = EditorError::from(CoreError::SelfConnection("a".into()));
        assert!(e.is_validation());
        assert_eq!(e.user_message(), e.to_string());
    }
}
