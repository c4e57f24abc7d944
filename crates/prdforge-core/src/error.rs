use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("page '{0}' not found")]
    UnknownNode(String),

    #[error("connection '{0}' not found")]
    UnknownEdge(String),

    #[error("connection '{edge}' references missing page '{endpoint}'")]
    DanglingEdge { edge: String, endpoint: String },

    #[error("a page cannot connect to itself ('{0}')")]
    SelfConnection(String),

    #[error("pages '{from}' and '{to}' are already connected")]
    DuplicateConnection { from: String, to: String },

    #[error("layout page '{0}' has no stored counterpart")]
    UnmappedPage(String),
}
