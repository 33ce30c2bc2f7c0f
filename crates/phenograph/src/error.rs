use thiserror::Error;

use crate::node::NodeId;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to load image: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown tool class: {0}")]
    UnknownTool(String),

    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("Node {0} is not a group")]
    NotAGroup(NodeId),

    #[error("Node {0} is not a module")]
    NotAModule(NodeId),

    #[error("Node {0} is protected and cannot be removed")]
    ProtectedNode(NodeId),

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Context is locked by a running pipeline")]
    ContextLocked,

    #[error("Unsupported pipeline document: {0}")]
    UnsupportedDocument(String),

    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure raised by an operator while processing one image.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("{tool} requires a mask but none is available")]
    MissingMask { tool: String },

    #[error("{tool} requires an image but none is available")]
    MissingImage { tool: String },

    #[error("{tool}: invalid parameter '{name}': {reason}")]
    InvalidParameter {
        tool: String,
        name: String,
        reason: String,
    },

    #[error("{tool} cannot generate ROIs")]
    NoRoiSupport { tool: String },

    #[error("{tool}: {message}")]
    Failed { tool: String, message: String },
}
