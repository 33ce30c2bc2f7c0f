//! Per-run execution state: callback dispatch, error log, mosaic cache and
//! cooperative cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::DynamicImage;
use tracing::{debug, error, warn};

use crate::{
    node::NodeId,
    settings::PipelineSettings,
    types::{FeatureData, LogEntry, NodeResult, Severity},
};

/// Data attached to a progress event.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// Result of a node that just ran.
    Node {
        id: NodeId,
        name: String,
        result: NodeResult,
    },
    /// A named image, e.g. the source image or a step mosaic.
    Image { name: String, image: DynamicImage },
    /// The final mosaic preview.
    Mosaic(DynamicImage),
    /// One grid-search combination.
    GridSearch {
        params: FeatureData,
        preview: Option<DynamicImage>,
        data: FeatureData,
    },
}

impl EventPayload {
    fn tagged_image(&self) -> Option<(&str, DynamicImage)> {
        match self {
            EventPayload::Node { name, result, .. } => result.preview().map(|image| (name.as_str(), image)),
            EventPayload::Image { name, image } => Some((name.as_str(), image.clone())),
            EventPayload::Mosaic(_) | EventPayload::GridSearch { .. } => None,
        }
    }
}

/// What the callback receives. `step` and `total` are `-1` outside progress reporting.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub severity: Severity,
    pub source: String,
    pub message: String,
    pub payload: Option<EventPayload>,
    pub step: i64,
    pub total: i64,
}

pub type ProgressCallback<'a> = Box<dyn FnMut(&ProgressEvent) + 'a>;

/// Options for one [`crate::Pipeline::execute`] call.
#[derive(Default)]
pub struct ExecuteOptions<'a> {
    /// Stop right after this node and return its result.
    pub target_node: Option<NodeId>,
    /// Run this module in grid-search mode instead of normally.
    pub grid_search_target: Option<NodeId>,
    pub callback: Option<ProgressCallback<'a>>,
}

impl<'a> ExecuteOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, node: NodeId) -> Self {
        self.target_node = Some(node);
        self
    }

    pub fn with_grid_search(mut self, node: NodeId) -> Self {
        self.grid_search_target = Some(node);
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&ProgressEvent) + 'a,
    {
        self.callback = Some(Box::new(callback));
        self
    }
}

/// State threaded through every node execution of one run.
pub struct RunState<'a> {
    pub(crate) settings: PipelineSettings,
    error_log: Vec<LogEntry>,
    mosaic_cache: HashMap<String, DynamicImage>,
    callback: Option<ProgressCallback<'a>>,
    stop: Arc<AtomicBool>,
    pub(crate) target_node: Option<NodeId>,
    pub(crate) grid_search_target: Option<NodeId>,
    pub(crate) target_reached: bool,
    pub(crate) mosaic: Option<DynamicImage>,
}

/// What a finished run leaves behind.
pub(crate) struct RunOutcome {
    pub error_log: Vec<LogEntry>,
    pub mosaic_cache: HashMap<String, DynamicImage>,
    pub mosaic: Option<DynamicImage>,
}

impl<'a> RunState<'a> {
    pub(crate) fn new(settings: PipelineSettings, stop: Arc<AtomicBool>, options: ExecuteOptions<'a>) -> Self {
        Self {
            settings,
            error_log: Vec::new(),
            mosaic_cache: HashMap::new(),
            callback: options.callback,
            stop,
            target_node: options.target_node,
            grid_search_target: options.grid_search_target,
            target_reached: false,
            mosaic: None,
        }
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn error_log(&self) -> &[LogEntry] {
        &self.error_log
    }

    pub fn mosaic_cache(&self) -> &HashMap<String, DynamicImage> {
        &self.mosaic_cache
    }

    /// Dispatch one event: log it, cache tagged images for the mosaic,
    /// raise the stop flag past the threshold and forward it to the callback.
    pub fn notify(
        &mut self,
        severity: Severity,
        source: &str,
        message: impl Into<String>,
        payload: Option<EventPayload>,
        step: i64,
        total: i64,
    ) {
        let message = message.into();
        match severity {
            Severity::Ok => debug!(source, step, total, "{message}"),
            Severity::Warning => warn!(source, "{message}"),
            Severity::Error | Severity::Exception => error!(source, "{message}"),
        }

        if severity > Severity::Ok {
            self.error_log.push(LogEntry {
                severity,
                source: source.to_string(),
                message: message.clone(),
            });
        }

        if let Some((name, image)) = payload.as_ref().and_then(EventPayload::tagged_image) {
            if self.settings.mosaic_references(name) {
                self.mosaic_cache.insert(name.to_string(), image);
            }
        }

        if severity.level() >= self.settings.stop_on_severity {
            self.stop.store(true, Ordering::Relaxed);
        }

        if let Some(callback) = self.callback.as_mut() {
            callback(&ProgressEvent {
                severity,
                source: source.to_string(),
                message,
                payload,
                step,
                total,
            });
        }
    }

    pub(crate) fn finish(self) -> RunOutcome {
        RunOutcome {
            error_log: self.error_log,
            mosaic_cache: self.mosaic_cache,
            mosaic: self.mosaic,
        }
    }
}
