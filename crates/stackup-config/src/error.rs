use stackup_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "No stack file found. Looked for:\n\
        - STACKUP_CONFIG_PATH\n\
        - current directory: stack.local.kdl, stack.kdl\n\
        - ./.stackup/stack.kdl\n\
        - ~/.config/stackup/stack.kdl"
    )]
    StackFileNotFound,

    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("Invalid value for '{node}': {message}")]
    InvalidValue { node: String, message: String },

    #[error("{0}")]
    Invalid(#[from] CloudError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(node: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            node: node.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
