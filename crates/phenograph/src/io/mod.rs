//! Pipeline documents: the current tree format and the legacy flat format.

pub mod json;
pub mod legacy;

pub use json::{DOCUMENT_TITLE, LoadIssue, LoadedPipeline, NodeDocument, PipelineDocument, ToolDocument};
pub use legacy::{LEGACY_TITLE, LegacyConversion};
