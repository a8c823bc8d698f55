use std::fmt;

#[derive(Debug)]
pub enum ShieldError {
    Config(String),
    StoreUnavailable(String),
    StoreTimeout,
    Script(String),
    Upstream(String),
}

impl fmt::Display for ShieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShieldError::Config(msg) => write!(f, "config error: {}", msg),
            ShieldError::StoreUnavailable(msg) => write!(f, "store unavailable: {}", msg),
            ShieldError::StoreTimeout => write!(f, "store command timed out"),
            ShieldError::Script(msg) => write!(f, "script error: {}", msg),
            ShieldError::Upstream(msg) => write!(f, "upstream error: {}", msg),
        }
    }
}

impl std::error::Error for ShieldError {}
