use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid value '{value}' for {section}.{key}")]
    Invalid {
        section: String,
        key: String,
        value: String,
    },
}
