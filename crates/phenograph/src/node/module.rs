use std::time::Instant;

use image::DynamicImage;
use tracing::{debug, warn};

use super::{NodeClass, NodeId};
use crate::{
    context::ProcessingContext,
    grid::{candidates, cartesian_product},
    run::{EventPayload, RunState},
    traits::{Operator, ToolOutput, ToolValue},
    tree::NodeTree,
    types::{IoKind, NodeResult, Severity},
};

/// Leaf node running a single operator.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub operator: Box<dyn Operator>,
    pub enabled: bool,
    /// Intermediate images from the last run, replayed on memoized hits.
    stored_images: Vec<(String, DynamicImage)>,
}

/// Outcome of one standard operator invocation.
struct StandardRun {
    result: NodeResult,
    output: Option<ToolOutput>,
    roi_warning: Option<String>,
}

/// Run an operator once and shape its output according to its output kind.
fn standard_execution(operator: &mut dyn Operator, ctx: &ProcessingContext) -> StandardRun {
    let output = match operator.execute(ctx) {
        Ok(output) => output,
        Err(e) => {
            return StandardRun {
                result: NodeResult::failure(e.to_string()),
                output: None,
                roi_warning: None,
            };
        }
    };

    let mut result = NodeResult::default();
    let mut roi_warning = None;
    match operator.output_kind() {
        IoKind::Roi => match operator.generate_rois(ctx) {
            Ok(rois) => result.rois = rois,
            Err(e) => roi_warning = Some(e.to_string()),
        },
        IoKind::Mask => {
            result.mask = match &output.result {
                Some(ToolValue::Mask(mask)) => Some(mask.clone()),
                Some(ToolValue::Image(image)) => Some(image.to_luma8()),
                _ => None,
            };
        }
        IoKind::Image => {
            result.image = match &output.result {
                Some(ToolValue::Image(image)) => Some(image.clone()),
                Some(ToolValue::Mask(mask)) => Some(DynamicImage::ImageLuma8(mask.clone())),
                _ => output.demo_image.clone(),
            };
        }
        IoKind::Data => {
            result.data = output.data.clone();
            if let Some(ToolValue::Data(data)) = &output.result {
                for (key, value) in data {
                    result.data.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        IoKind::None => {}
    }
    result.demo_image = output.demo_image.clone();

    StandardRun {
        result,
        output: Some(output),
        roi_warning,
    }
}

fn set_output_path(operator: &mut dyn Operator, output_path: &str) {
    if output_path.is_empty() || !operator.params().contains("path") {
        return;
    }
    if let Err(e) = operator.params_mut().set("path", output_path) {
        warn!(tool = %operator.name(), error = %e, "could not set output path");
    }
}

impl ModuleNode {
    pub fn new(operator: Box<dyn Operator>) -> Self {
        Self {
            operator,
            enabled: true,
            stored_images: Vec::new(),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// A run-time copy of the operator whose `path` parameter points at the
    /// pipeline output folder, or `None` when no injection applies.
    ///
    /// The stored operator keeps its own value so saving stays stable.
    fn with_output_path(&self, output_path: &str) -> Option<Box<dyn Operator>> {
        if output_path.is_empty() || !self.operator.params().contains("path") {
            return None;
        }
        let mut operator = self.operator.boxed_clone();
        set_output_path(operator.as_mut(), output_path);
        Some(operator)
    }

    /// Run every parameter combination described by the grid-search specs.
    ///
    /// Each combination runs on a fresh copy of the operator against a
    /// scratch context; nothing is memoized.
    fn grid_search(&self, ctx: &ProcessingContext, run: &mut RunState<'_>) {
        let name = self.operator.name().to_string();
        let mut fixed = Vec::new();
        let mut axes = Vec::new();
        for param in self.operator.params().iter() {
            match candidates(param) {
                Ok(values) if values.len() > 1 => axes.push((param.name.clone(), values)),
                Ok(mut values) => {
                    if let Some(value) = values.pop() {
                        fixed.push((param.name.clone(), value));
                    }
                }
                Err(e) => {
                    run.notify(Severity::Error, &name, e.to_string(), None, -1, -1);
                    return;
                }
            }
        }

        let combos = cartesian_product(&axes);
        let total = combos.len() as i64;
        debug!(tool = %name, total, "grid search");

        for (step, combo) in combos.into_iter().enumerate() {
            if run.should_stop() {
                break;
            }
            let mut operator = self.operator.boxed_clone();
            let mut applied = crate::types::FeatureData::new();
            for (param, value) in fixed.iter().chain(combo.iter()) {
                if operator.params_mut().set(param, value.clone()).is_ok() {
                    applied.insert(param.clone(), value.clone());
                }
            }
            set_output_path(operator.as_mut(), &run.settings.image_output_path);

            let scratch = ctx.clone();
            let outcome = standard_execution(operator.as_mut(), &scratch);
            let preview = outcome
                .output
                .as_ref()
                .and_then(ToolOutput::preview)
                .or_else(|| outcome.result.preview());
            let (severity, message) = match &outcome.result.error {
                None => (Severity::Ok, format!("{name}: combination {} of {total}", step + 1)),
                Some(e) => (Severity::Warning, format!("{name}: combination {} failed: {e}", step + 1)),
            };
            let data = match outcome.output {
                Some(output) => output.data,
                None => outcome.result.data,
            };
            run.notify(
                severity,
                &name,
                message,
                Some(EventPayload::GridSearch {
                    params: applied,
                    preview,
                    data,
                }),
                step as i64,
                total,
            );
        }
    }
}

impl NodeTree {
    /// Execute a module, reusing its memoized result when present.
    pub(crate) fn execute_module(
        &mut self,
        id: NodeId,
        ctx: &mut ProcessingContext,
        run: &mut RunState<'_>,
    ) -> Option<NodeResult> {
        let step = self.absolute_index(id).map(|i| i as i64).unwrap_or(-1);
        let total = self.absolute_count(NodeClass::Module) as i64;
        let node = self.get_mut(id)?;

        if let Some(result) = &node.last_result {
            let module = node.as_module()?;
            for (name, image) in &module.stored_images {
                ctx.store_image(name.clone(), image.clone());
            }
            // A cached failure still counts toward the stop threshold.
            if let Some(e) = &result.error {
                let name = module.operator.name().to_string();
                run.notify(
                    Severity::Error,
                    &name,
                    format!("{name} failed: {e}"),
                    Some(EventPayload::Node {
                        id,
                        name: name.clone(),
                        result: result.clone(),
                    }),
                    step,
                    total,
                );
            }
            return Some(result.clone());
        }
        if run.should_stop() {
            return None;
        }

        let module = node.as_module_mut()?;
        let name = module.operator.name().to_string();

        if run.grid_search_target == Some(id) {
            module.grid_search(ctx, run);
            return None;
        }

        let mut injected = module.with_output_path(&run.settings.image_output_path);
        let operator = match injected.as_mut() {
            Some(operator) => operator.as_mut(),
            None => module.operator.as_mut(),
        };
        let started = Instant::now();
        let outcome = standard_execution(operator, ctx);
        let elapsed = started.elapsed();

        module.stored_images = outcome
            .output
            .map(|output| output.images)
            .unwrap_or_default();
        if run.settings.debug_mode {
            if let Some(preview) = outcome.result.preview() {
                module.stored_images.push((name.clone(), preview));
            }
        }
        for (image_name, image) in &module.stored_images {
            ctx.store_image(image_name.clone(), image.clone());
        }

        let result = outcome.result;
        node.last_result = Some(result.clone());

        if let Some(warning) = outcome.roi_warning {
            run.notify(Severity::Warning, &name, format!("ROI generation failed: {warning}"), None, -1, -1);
        }

        let (severity, message) = match &result.error {
            None => (Severity::Ok, format!("{name} succeeded in {} ms", elapsed.as_millis())),
            Some(e) => (Severity::Error, format!("{name} failed after {} ms: {e}", elapsed.as_millis())),
        };
        run.notify(
            severity,
            &name,
            message,
            Some(EventPayload::Node {
                id,
                name: name.clone(),
                result: result.clone(),
            }),
            step,
            total,
        );

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use image::GrayImage;

    use super::*;
    use crate::{
        error::ToolError,
        params::ToolParams,
        run::{ExecuteOptions, ProgressEvent},
        settings::PipelineSettings,
        types::MergeMode,
        node::SourceRef,
    };

    /// Counts invocations, remembers the output path it ran with and fails on demand.
    #[derive(Debug, Clone)]
    struct Recorder {
        calls: Arc<AtomicUsize>,
        seen_path: Arc<Mutex<Option<String>>>,
        params: ToolParams,
    }

    impl Recorder {
        fn new(calls: Arc<AtomicUsize>) -> Self {
            Self {
                calls,
                seen_path: Arc::new(Mutex::new(None)),
                params: ToolParams::new()
                    .with("level", 1, "Any integer")
                    .with("mode", "a", "Any label")
                    .with("fail", false, "Fail when true")
                    .with("path", "", "Output folder"),
            }
        }
    }

    impl Operator for Recorder {
        fn name(&self) -> &str {
            "Recorder"
        }
        fn class_name(&self) -> &'static str {
            "Recorder"
        }
        fn input_kind(&self) -> IoKind {
            IoKind::Image
        }
        fn output_kind(&self) -> IoKind {
            IoKind::Mask
        }
        fn params(&self) -> &ToolParams {
            &self.params
        }
        fn params_mut(&mut self) -> &mut ToolParams {
            &mut self.params
        }
        fn execute(&mut self, ctx: &ProcessingContext) -> Result<ToolOutput, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut seen) = self.seen_path.lock() {
                *seen = self.params.get_str("path");
            }
            if self.params.get_bool("fail").unwrap_or(false) {
                return Err(ToolError::Failed { tool: "Recorder".into(), message: "asked to fail".into() });
            }
            let level = self.params.get_i64("level").unwrap_or(0);
            Ok(ToolOutput::mask(GrayImage::new(ctx.image.width(), ctx.image.height()))
                .with_data("level", level))
        }
    }

    fn setup(recorder: Recorder) -> (NodeTree, NodeId, ProcessingContext) {
        let mut tree = NodeTree::new();
        let root = tree.root_id();
        let group = tree
            .add_group(root, "Recording group", MergeMode::Chain, SourceRef::OriginalInput)
            .unwrap();
        let id = tree.add_module(group, Box::new(recorder)).unwrap();
        let ctx = ProcessingContext::new("plant", DynamicImage::new_rgb8(4, 4));
        (tree, id, ctx)
    }

    fn run_state<'a>(options: ExecuteOptions<'a>, settings: PipelineSettings) -> RunState<'a> {
        RunState::new(settings, Arc::new(AtomicBool::new(false)), options)
    }

    #[test]
    fn test_module_is_memoized_until_invalidated() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut tree, id, mut ctx) = setup(Recorder::new(calls.clone()));
        let mut run = run_state(ExecuteOptions::new(), PipelineSettings::default());

        let first = tree.execute_module(id, &mut ctx, &mut run).unwrap();
        let second = tree.execute_module(id, &mut ctx, &mut run).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.mask, second.mask);

        tree.invalidate(id);
        tree.execute_module(id, &mut ctx, &mut run).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failure_is_recorded_not_raised() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut recorder = Recorder::new(calls);
        recorder.params.set("fail", true).unwrap();
        let (mut tree, id, mut ctx) = setup(recorder);
        let mut run = run_state(ExecuteOptions::new(), PipelineSettings::default());

        let result = tree.execute_module(id, &mut ctx, &mut run).unwrap();
        assert!(result.is_failure());
        assert_eq!(run.error_log().len(), 1);
        assert_eq!(run.error_log()[0].severity, Severity::Error);
        assert!(tree.get(id).unwrap().is_computed());
    }

    #[test]
    fn test_output_path_is_injected() {
        let recorder = Recorder::new(Arc::new(AtomicUsize::new(0)));
        let seen = recorder.seen_path.clone();
        let (mut tree, id, mut ctx) = setup(recorder);
        let settings = PipelineSettings {
            image_output_path: "/srv/out".into(),
            ..Default::default()
        };
        let mut run = run_state(ExecuteOptions::new(), settings);
        tree.execute_module(id, &mut ctx, &mut run).unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("/srv/out"));
        let module = tree.module(id).unwrap();
        assert_eq!(module.operator.params().get_str("path").as_deref(), Some(""));
    }

    #[test]
    fn test_memoized_failure_is_reported_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut recorder = Recorder::new(calls.clone());
        recorder.params.set("fail", true).unwrap();
        let (mut tree, id, mut ctx) = setup(recorder);

        let mut first = run_state(ExecuteOptions::new(), PipelineSettings::default());
        tree.execute_module(id, &mut ctx, &mut first).unwrap();
        assert!(first.should_stop());

        let mut second = run_state(ExecuteOptions::new(), PipelineSettings::default());
        let replayed = tree.execute_module(id, &mut ctx, &mut second).unwrap();
        assert!(replayed.is_failure());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.error_log().len(), 1);
        assert_eq!(second.error_log()[0].severity, Severity::Error);
        assert!(second.should_stop());
    }

    #[test]
    fn test_grid_search_runs_every_combination_on_copies() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut recorder = Recorder::new(calls.clone());
        recorder.params.set_grid_search("level", "1|3;1").unwrap();
        recorder.params.set_grid_search("mode", "a,b").unwrap();
        let (mut tree, id, mut ctx) = setup(recorder);

        let mut events: Vec<(i64, i64, i64)> = Vec::new();
        let options = ExecuteOptions::new()
            .with_grid_search(id)
            .with_callback(|e: &ProgressEvent| {
                if let Some(EventPayload::GridSearch { params, data, .. }) = &e.payload {
                    assert_eq!(params["level"], data["level"]);
                    events.push((e.step, e.total, data["level"].as_i64().unwrap()));
                }
            });
        let mut run = run_state(options, PipelineSettings::default());

        assert!(tree.execute_module(id, &mut ctx, &mut run).is_none());
        drop(run);

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(events.len(), 6);
        assert!(events.iter().all(|(_, total, _)| *total == 6));
        assert_eq!(events.first().map(|e| e.0), Some(0));
        // Shared operator untouched and nothing memoized
        assert!(!tree.get(id).unwrap().is_computed());
        assert_eq!(tree.module(id).unwrap().operator.params().get_i64("level"), Some(1));
    }
}
