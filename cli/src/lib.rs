use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use phenograph::{NodeId, NodeKind, NodeTree, Pipeline, ProcessingContext};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Pipeline(#[from] phenograph::PipelineError),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Node {0} is not part of the pipeline")]
    UnknownTarget(String),
}

/// Summary written next to the images after a run.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub image: String,
    pub success: bool,
    pub features: serde_json::Map<String, serde_json::Value>,
    pub log: Vec<phenograph::LogEntry>,
}

/// Parse a `--target` argument against the pipeline's nodes.
pub fn parse_target(pipeline: &Pipeline, raw: &str) -> Result<NodeId, CliError> {
    NodeId::parse(raw)
        .filter(|id| pipeline.tree().contains(*id))
        .ok_or_else(|| CliError::UnknownTarget(raw.to_string()))
}

/// Write the final image, mask, mosaic and feature report into `dir`.
/// Returns the written paths.
pub fn write_outputs(
    pipeline: &Pipeline,
    ctx: &ProcessingContext,
    success: bool,
    dir: &Path,
) -> Result<Vec<PathBuf>, CliError> {
    fs::create_dir_all(dir)?;
    let stem = Path::new(ctx.identity())
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image")
        .to_string();
    let mut written = Vec::new();

    if let Some(image) = pipeline.final_result().and_then(|r| r.image.as_ref()) {
        let path = dir.join(format!("{stem}_result.png"));
        image.to_rgb8().save(&path)?;
        written.push(path);
    }
    if let Some(mask) = &ctx.mask {
        let path = dir.join(format!("{stem}_mask.png"));
        mask.save(&path)?;
        written.push(path);
    }
    if let Some(mosaic) = pipeline.mosaic() {
        let path = dir.join(format!("{stem}_mosaic.png"));
        mosaic.to_rgb8().save(&path)?;
        written.push(path);
    }

    let report = RunReport {
        image: ctx.identity().to_string(),
        success,
        features: ctx.features.clone(),
        log: pipeline.error_log().to_vec(),
    };
    let path = dir.join(format!("{stem}_features.json"));
    fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    written.push(path);

    Ok(written)
}

/// Indented outline of the tree, one node per line.
pub fn render_tree(tree: &NodeTree) -> String {
    let mut out = String::new();
    render_node(tree, tree.root_id(), 0, &mut out);
    out
}

fn render_node(tree: &NodeTree, id: NodeId, depth: usize, out: &mut String) {
    let Some(node) = tree.get(id) else {
        return;
    };
    let indent = "  ".repeat(depth);
    match node.kind() {
        NodeKind::Group(group) => {
            let _ = writeln!(
                out,
                "{indent}[{}] {} (source: {}{}) {id}",
                group.merge_mode,
                group.name,
                group.source,
                if group.no_delete { ", locked" } else { "" },
            );
            for child in &group.children {
                render_node(tree, *child, depth + 1, out);
            }
        }
        NodeKind::Module(module) => {
            let _ = writeln!(
                out,
                "{indent}- {} <{}> {} -> {}{} {id}",
                module.operator.name(),
                module.operator.class_name(),
                module.operator.input_kind(),
                module.operator.output_kind(),
                if module.enabled { "" } else { " (disabled)" },
            );
        }
    }
}
