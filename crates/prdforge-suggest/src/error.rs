use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Unauthorized(String),

    #[error("provider server error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("offline: {0}")]
    Offline(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("model returned an empty reply")]
    EmptyResponse,

    #[error("could not parse model reply: {0}")]
    Parse(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("expected a {expected} request, got {got}")]
    WrongRequestType {
        expected: &'static str,
        got: &'static str,
    },

    #[error("AI provider is not configured")]
    NotConfigured,

    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

impl GatewayError {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => GatewayError::RateLimited(body),
            401 | 403 => GatewayError::Unauthorized(body),
            408 => GatewayError::Timeout,
            500..=599 => GatewayError::Server { status, body },
            _ => GatewayError::Http { status, body },
        }
    }

    /// Classify an error that only arrives as text (multi-provider client).
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));
        if has(&["429", "rate limit", "too many requests"]) {
            GatewayError::RateLimited(message.to_string())
        } else if has(&["401", "403", "unauthorized", "invalid api key", "authentication"]) {
            GatewayError::Unauthorized(message.to_string())
        } else if has(&["timed out", "timeout"]) {
            GatewayError::Timeout
        } else if has(&["error sending request", "connection refused", "dns error", "connect"]) {
            GatewayError::Offline(message.to_string())
        } else if let Some(status) = [500u16, 502, 503, 504]
            .into_iter()
            .find(|s| lower.contains(&s.to_string()))
        {
            GatewayError::Server {
                status,
                body: message.to_string(),
            }
        } else {
            GatewayError::Provider(message.to_string())
        }
    }

    /// One of a fixed set of strings safe to show to users.
    pub fn user_message(&self) -> &'static str {
        match self {
            GatewayError::RateLimited(_) => {
                "Too many requests to the AI service. Please wait a moment and try again."
            }
            GatewayError::Unauthorized(_) | GatewayError::NotConfigured => {
                "The AI service rejected our credentials. Check the API key in settings."
            }
            GatewayError::Server { .. } => {
                "The AI service is having problems right now. Please try again later."
            }
            GatewayError::Timeout => "The AI service took too long to respond. Please try again.",
            GatewayError::Offline(_) => "You appear to be offline. Check your internet connection.",
            _ => "Something went wrong while generating content. Please try again.",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_connect() {
            GatewayError::Offline(e.to_string())
        } else if let Some(status) = e.status() {
            GatewayError::from_status(status.as_u16(), e.to_string())
        } else {
            GatewayError::Provider(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_keyed_messages() {
        let cases = [
            (429, "Too many requests"),
            (401, "credentials"),
            (403, "credentials"),
            (503, "having problems"),
            (408, "too long"),
            (418, "Something went wrong"),
        ];
        for (status, needle) in cases {
            let msg = GatewayError::from_status(status, String::new()).user_message();
            assert!(msg.contains(needle), "{status}: {msg}");
        }
    }

    #[test]
    fn classifies_provider_text() {
        assert!(matches!(
            GatewayError::classify("HTTP Error: 429 Too Many Requests"),
            GatewayError::RateLimited(_)
        ));
        assert!(matches!(
            GatewayError::classify("Auth Error: Invalid API key"),
            GatewayError::Unauthorized(_)
        ));
        assert!(matches!(
            GatewayError::classify("error sending request for url"),
            GatewayError::Offline(_)
        ));
        assert!(matches!(
            GatewayError::classify("upstream returned 502 Bad Gateway"),
            GatewayError::Server { status: 502, .. }
        ));
        assert!(matches!(
            GatewayError::classify("model refused"),
            GatewayError::Provider(_)
        ));
    }
}
