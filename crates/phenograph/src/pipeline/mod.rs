pub mod builder;

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::DynamicImage;
use serde_json::Value;
use tracing::{info, instrument};

use crate::{
    context::ProcessingContext,
    error::{PipelineError, Result},
    io::json::{self, LoadedPipeline},
    node::{NodeId, SourceRef},
    registry::ToolRegistry,
    run::{ExecuteOptions, RunState},
    settings::PipelineSettings,
    traits::Operator,
    tree::NodeTree,
    types::{LogEntry, MergeMode, NodeResult, Severity},
};

/// A tree of image-processing nodes plus its settings and last-run state.
#[derive(Debug)]
pub struct Pipeline {
    tree: NodeTree,
    pub settings: PipelineSettings,
    pub name: String,
    pub description: String,
    pub version: String,
    /// Creation date as written in the document.
    pub date: String,
    last_input_identity: Option<String>,
    error_log: Vec<LogEntry>,
    mosaic_cache: HashMap<String, DynamicImage>,
    last_mosaic: Option<DynamicImage>,
    /// What the last run handed back, the target node's result when one was set.
    last_output: Option<NodeResult>,
    stop: Arc<AtomicBool>,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder() -> builder::PipelineBuilder {
        builder::PipelineBuilder::new()
    }

    /// An empty pipeline holding only the root group.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_tree(NodeTree::new(), PipelineSettings::default(), name)
    }

    pub(crate) fn from_tree(tree: NodeTree, settings: PipelineSettings, name: impl Into<String>) -> Self {
        Self {
            tree,
            settings,
            name: name.into(),
            description: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            date: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            last_input_identity: None,
            error_log: Vec::new(),
            mosaic_cache: HashMap::new(),
            last_mosaic: None,
            last_output: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub(crate) fn tree_mut(&mut self) -> &mut NodeTree {
        &mut self.tree
    }

    pub fn root_id(&self) -> NodeId {
        self.tree.root_id()
    }

    /// Run the whole tree on `ctx`.
    ///
    /// Results memoized for a different image are discarded first. Returns
    /// `true` when no logged event reached the stop threshold; details are
    /// in [`Pipeline::error_log`].
    #[instrument(skip_all, fields(pipeline = %self.name, image = %ctx.identity()))]
    pub fn execute(&mut self, ctx: &mut ProcessingContext, options: ExecuteOptions<'_>) -> bool {
        if self.last_input_identity.as_deref() != Some(ctx.identity()) {
            self.tree.invalidate_all();
            self.last_input_identity = Some(ctx.identity().to_string());
        }
        if let Some(target) = options.grid_search_target {
            // Grid search must not be served from the memo
            self.tree.invalidate(target);
        }

        self.settings = self.settings.clone().normalized();
        ctx.reset();
        ctx.set_locked(true);
        self.stop.store(false, Ordering::Relaxed);

        let mut run = RunState::new(self.settings.clone(), self.stop.clone(), options);
        let root = self.tree.root_id();
        self.last_output = self.tree.execute_node(root, ctx, &mut run);
        ctx.set_locked(false);

        let outcome = run.finish();
        self.error_log = outcome.error_log;
        self.mosaic_cache = outcome.mosaic_cache;
        self.last_mosaic = outcome.mosaic;

        let success = self.max_severity().level() < self.settings.stop_on_severity;
        info!(success, issues = self.error_log.len(), "pipeline finished");
        success
    }

    /// Clear the memoized results of `id` and everything after it.
    pub fn invalidate(&mut self, id: NodeId) {
        self.tree.invalidate(id);
    }

    pub fn invalidate_all(&mut self) {
        self.tree.invalidate_all();
    }

    pub fn add_module(&mut self, parent: NodeId, operator: Box<dyn Operator>) -> Result<NodeId> {
        let id = self.tree.add_module(parent, operator)?;
        self.tree.invalidate(id);
        Ok(id)
    }

    pub fn add_group(&mut self, parent: NodeId, name: &str, merge_mode: MergeMode, source: SourceRef) -> Result<NodeId> {
        let id = self.tree.add_group(parent, name, merge_mode, source)?;
        self.tree.invalidate(id);
        Ok(id)
    }

    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        self.tree.remove_node(id)
    }

    /// Change an operator parameter, invalidating the module and everything after it.
    pub fn set_param(&mut self, id: NodeId, name: &str, value: impl Into<Value>) -> Result<()> {
        self.tree.module_mut(id)?.operator.params_mut().set(name, value)?;
        self.tree.invalidate(id);
        Ok(())
    }

    pub fn set_grid_search(&mut self, id: NodeId, name: &str, spec: &str) -> Result<()> {
        self.tree.module_mut(id)?.operator.params_mut().set_grid_search(name, spec)
    }

    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) -> Result<()> {
        self.tree.module_mut(id)?.enabled = enabled;
        self.tree.invalidate(id);
        Ok(())
    }

    pub fn set_merge_mode(&mut self, id: NodeId, merge_mode: MergeMode) -> Result<()> {
        self.tree.group_mut(id)?.merge_mode = merge_mode;
        self.tree.invalidate(id);
        Ok(())
    }

    pub fn set_source(&mut self, id: NodeId, source: SourceRef) -> Result<()> {
        self.tree.group_mut(id)?.source = source;
        self.tree.invalidate(id);
        Ok(())
    }

    /// Raising the returned flag stops the current run at the next node boundary.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn error_log(&self) -> &[LogEntry] {
        &self.error_log
    }

    /// Highest severity logged by the last run, `Ok` when nothing was logged.
    pub fn max_severity(&self) -> Severity {
        self.error_log
            .iter()
            .map(|entry| entry.severity)
            .max()
            .unwrap_or(Severity::Ok)
    }

    pub fn mosaic(&self) -> Option<&DynamicImage> {
        self.last_mosaic.as_ref()
    }

    pub fn mosaic_cache(&self) -> &HashMap<String, DynamicImage> {
        &self.mosaic_cache
    }

    /// Result of the last run: the target node's when the run stopped at one,
    /// otherwise the root's.
    pub fn final_result(&self) -> Option<&NodeResult> {
        self.last_output.as_ref()
    }

    pub fn root_result(&self) -> Option<&NodeResult> {
        self.result_of(self.tree.root_id())
    }

    pub fn result_of(&self, id: NodeId) -> Option<&NodeResult> {
        self.tree.get(id).and_then(|node| node.last_result())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&json::to_document(self)?)?)
    }

    /// Parse a pipeline document in the current or the legacy format.
    pub fn from_json(content: &str, registry: &ToolRegistry) -> Result<LoadedPipeline> {
        let value: Value = serde_json::from_str(content)?;
        json::from_value(&value, registry)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P, registry: &ToolRegistry) -> Result<LoadedPipeline> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content, registry)
    }

    /// Independent deep copy with fresh run state, safe to execute concurrently.
    pub fn duplicate(&self, registry: &ToolRegistry) -> Result<Self> {
        let loaded = Self::from_json(&self.to_json()?, registry)?;
        if let Some(issue) = loaded.issues.first() {
            return Err(PipelineError::UnsupportedDocument(issue.to_string()));
        }
        Ok(loaded.pipeline)
    }
}
