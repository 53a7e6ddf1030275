use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CcxError {
    #[error("Input error: file {0} does not exist")]
    FileNotFound(PathBuf),

    #[error("Input error: {0}")]
    Input(String),

    #[error("Element error: unsupported element kind {label} with {node_count} nodes")]
    UnsupportedElementKind { label: String, node_count: usize },

    #[error("Mesh error: {0}")]
    EmptyOrUnsupportedMesh(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Post Processor error: {0}")]
    Output(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
}
