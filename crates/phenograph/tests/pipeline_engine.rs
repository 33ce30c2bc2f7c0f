use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use image::{DynamicImage, Rgb, RgbImage};
use phenograph::algorithms::{Brightness, GaussianBlur, Threshold};
use phenograph::*;

/// Passes its input through and counts how often it ran.
#[derive(Debug, Clone)]
struct Counter {
    calls: Arc<AtomicUsize>,
    params: ToolParams,
}

impl Counter {
    fn new(calls: Arc<AtomicUsize>) -> Self {
        Self {
            calls,
            params: ToolParams::new().with("gain", 1, "Unused knob"),
        }
    }
}

impl Operator for Counter {
    fn name(&self) -> &str {
        "Counter"
    }

    fn class_name(&self) -> &'static str {
        "Counter"
    }

    fn input_kind(&self) -> IoKind {
        IoKind::Image
    }

    fn output_kind(&self) -> IoKind {
        IoKind::Image
    }

    fn params(&self) -> &ToolParams {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ToolParams {
        &mut self.params
    }

    fn execute(&mut self, ctx: &ProcessingContext) -> std::result::Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolOutput::image(ctx.image.clone()))
    }
}

/// Gradient from black on the left to bright on the right.
fn gradient() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(32, 16, |x, _| {
        let v = (x * 8) as u8;
        Rgb([v, v, v])
    }))
}

struct Fixture {
    pipeline: Pipeline,
    counters: Vec<Arc<AtomicUsize>>,
    modules: Vec<NodeId>,
}

/// Two chained groups holding three counting modules.
fn fixture() -> Fixture {
    let mut pipeline = Pipeline::new("counting");
    let root = pipeline.root_id();
    let first = pipeline
        .add_group(root, "Fix image", MergeMode::Chain, SourceRef::OriginalInput)
        .unwrap();
    let second = pipeline
        .add_group(root, "Pre process image", MergeMode::Chain, SourceRef::NearestPriorOutput)
        .unwrap();

    let counters: Vec<_> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let modules = vec![
        pipeline.add_module(first, Box::new(Counter::new(counters[0].clone()))).unwrap(),
        pipeline.add_module(first, Box::new(Counter::new(counters[1].clone()))).unwrap(),
        pipeline.add_module(second, Box::new(Counter::new(counters[2].clone()))).unwrap(),
    ];
    Fixture { pipeline, counters, modules }
}

fn calls(counters: &[Arc<AtomicUsize>]) -> Vec<usize> {
    counters.iter().map(|c| c.load(Ordering::SeqCst)).collect()
}

#[test]
fn memoized_nodes_run_once_per_image() {
    let mut f = fixture();
    let mut ctx = ProcessingContext::new("plant_01.png", gradient());

    assert!(f.pipeline.execute(&mut ctx, ExecuteOptions::new()));
    assert!(f.pipeline.execute(&mut ctx, ExecuteOptions::new()));
    assert_eq!(calls(&f.counters), vec![1, 1, 1]);

    let mut other = ProcessingContext::new("plant_02.png", gradient());
    assert!(f.pipeline.execute(&mut other, ExecuteOptions::new()));
    assert_eq!(calls(&f.counters), vec![2, 2, 2]);
}

#[test]
fn invalidation_cascades_to_later_nodes_only() {
    let mut f = fixture();
    let mut ctx = ProcessingContext::new("plant_01.png", gradient());
    f.pipeline.execute(&mut ctx, ExecuteOptions::new());

    f.pipeline.invalidate(f.modules[1]);
    assert!(f.pipeline.result_of(f.modules[0]).is_some());
    assert!(f.pipeline.result_of(f.modules[1]).is_none());
    assert!(f.pipeline.result_of(f.modules[2]).is_none());

    f.pipeline.execute(&mut ctx, ExecuteOptions::new());
    assert_eq!(calls(&f.counters), vec![1, 2, 2]);
}

#[test]
fn removing_a_node_invalidates_what_follows() {
    let mut f = fixture();
    let mut ctx = ProcessingContext::new("plant_01.png", gradient());
    f.pipeline.execute(&mut ctx, ExecuteOptions::new());

    f.pipeline.remove_node(f.modules[1]).unwrap();
    assert!(f.pipeline.tree().get(f.modules[1]).is_none());
    assert!(f.pipeline.result_of(f.modules[0]).is_some());
    assert!(f.pipeline.result_of(f.modules[2]).is_none());

    let root = f.pipeline.root_id();
    assert!(matches!(f.pipeline.remove_node(root), Err(PipelineError::ProtectedNode(_))));
}

#[test]
fn template_groups_cannot_be_removed() {
    let mut pipeline = Pipeline::builder().legacy_template(MergeMode::And, false).build().unwrap();
    let group = pipeline.tree().find_group("Build mask").unwrap();
    assert!(matches!(pipeline.remove_node(group), Err(PipelineError::ProtectedNode(_))));
}

#[test]
fn sibling_groups_get_unique_names() {
    let mut pipeline = Pipeline::new("names");
    let root = pipeline.root_id();
    let a = pipeline.add_group(root, "X", MergeMode::Chain, SourceRef::default()).unwrap();
    let b = pipeline.add_group(root, "X", MergeMode::Chain, SourceRef::default()).unwrap();
    let c = pipeline.add_group(root, "X", MergeMode::Chain, SourceRef::default()).unwrap();
    let names: Vec<_> = [a, b, c]
        .iter()
        .map(|id| pipeline.tree().group(*id).unwrap().name.clone())
        .collect();
    assert_eq!(names, vec!["X", "X 1", "X 2"]);
}

#[test]
fn brightness_then_threshold_builds_a_binary_mask() {
    let mut pipeline = Pipeline::builder()
        .group("Fix image", MergeMode::Chain, SourceRef::OriginalInput)
        .module(Brightness::default())
        .group("Build mask", MergeMode::Chain, SourceRef::NearestPriorOutput)
        .module(Threshold::default())
        .build()
        .unwrap();
    let fix = pipeline.tree().find_group("Fix image").unwrap();
    let bright = pipeline.tree().children(fix)[0];
    pipeline.set_param(bright, "delta", 40).unwrap();

    let mut ctx = ProcessingContext::new("gradient", gradient());
    assert!(pipeline.execute(&mut ctx, ExecuteOptions::new()));

    let mask = ctx.mask.as_ref().expect("mask should be built");
    assert!(mask.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    // 8x + 40 > 128 from x = 12 on
    assert_eq!(mask.get_pixel(11, 0).0[0], 0);
    assert_eq!(mask.get_pixel(12, 0).0[0], 255);
    assert_eq!(pipeline.root_result().and_then(|r| r.mask.as_ref()), Some(mask));
    assert_eq!(pipeline.final_result().and_then(|r| r.mask.as_ref()), Some(mask));
}

#[test]
fn target_run_keeps_the_target_result() {
    let mut pipeline = Pipeline::builder()
        .group("Fix image", MergeMode::Chain, SourceRef::OriginalInput)
        .module(Brightness::default())
        .group("Build mask", MergeMode::Chain, SourceRef::NearestPriorOutput)
        .module(Threshold::default())
        .build()
        .unwrap();
    let fix = pipeline.tree().find_group("Fix image").unwrap();
    let bright = pipeline.tree().children(fix)[0];
    pipeline.set_param(bright, "delta", 40).unwrap();

    let mut ctx = ProcessingContext::new("gradient", gradient());
    assert!(pipeline.execute(&mut ctx, ExecuteOptions::new().with_target(bright)));

    assert!(pipeline.root_result().is_none());
    let result = pipeline.final_result().expect("target result should be kept");
    assert!(result.mask.is_none());
    let image = result.image.as_ref().unwrap().to_rgb8();
    assert_eq!(image.get_pixel(1, 0), &Rgb([48, 48, 48]));
}

#[test]
fn external_stop_halts_remaining_nodes() {
    let mut f = fixture();
    let stop = f.pipeline.stop_handle();
    let first = f.modules[0];
    let options = ExecuteOptions::new().with_callback(move |e: &ProgressEvent| {
        if matches!(&e.payload, Some(EventPayload::Node { id, .. }) if *id == first) {
            stop.store(true, Ordering::Relaxed);
        }
    });
    let mut ctx = ProcessingContext::new("plant_01.png", gradient());
    f.pipeline.execute(&mut ctx, options);

    assert_eq!(calls(&f.counters), vec![1, 0, 0]);
    assert!(!ctx.is_locked());
}

#[test]
fn stop_flag_is_cleared_for_the_next_run() {
    let mut f = fixture();
    f.pipeline.stop_handle().store(true, Ordering::Relaxed);
    let mut ctx = ProcessingContext::new("plant_01.png", gradient());
    f.pipeline.execute(&mut ctx, ExecuteOptions::new());
    assert_eq!(calls(&f.counters), vec![1, 1, 1]);
}

#[test]
fn grid_search_reports_each_combination() {
    let mut pipeline = Pipeline::new("grid");
    let root = pipeline.root_id();
    let group = pipeline
        .add_group(root, "Build mask", MergeMode::Chain, SourceRef::OriginalInput)
        .unwrap();
    let thresh = pipeline.add_module(group, Box::new(Threshold::default())).unwrap();
    pipeline.set_grid_search(thresh, "threshold", "50|150;50").unwrap();
    pipeline.set_grid_search(thresh, "invert", "false,true").unwrap();

    let mut steps = Vec::new();
    let options = ExecuteOptions::new()
        .with_grid_search(thresh)
        .with_callback(|e: &ProgressEvent| {
            if let Some(EventPayload::GridSearch { params, preview, .. }) = &e.payload {
                assert!(preview.is_some());
                steps.push((e.step, e.total, params["threshold"].as_i64().unwrap_or(-1)));
            }
        });
    let mut ctx = ProcessingContext::new("gradient", gradient());
    pipeline.execute(&mut ctx, options);

    assert_eq!(steps.len(), 6);
    assert_eq!(steps[0], (0, 6, 50));
    assert_eq!(steps[5], (5, 6, 150));
    assert!(pipeline.result_of(thresh).is_none());
}

#[test]
fn failing_module_is_logged_and_halts_at_threshold() {
    let mut pipeline = Pipeline::new("failing");
    let root = pipeline.root_id();
    let blur = pipeline.add_module(root, Box::new(GaussianBlur::default())).unwrap();
    let after = pipeline.add_module(root, Box::new(Brightness::default())).unwrap();
    pipeline.set_param(blur, "sigma", -2.0).unwrap();

    let mut ctx = ProcessingContext::new("gradient", gradient());
    assert!(!pipeline.execute(&mut ctx, ExecuteOptions::new()));
    assert_eq!(pipeline.error_log().len(), 1);
    assert_eq!(pipeline.error_log()[0].severity, Severity::Error);
    assert!(pipeline.result_of(after).is_none());

    // The context can take a new image once the run is over
    ctx.set_source_image("next", gradient()).unwrap();
}

#[test]
fn cached_failure_still_fails_the_next_run() {
    let mut pipeline = Pipeline::new("failing twice");
    let root = pipeline.root_id();
    let blur = pipeline.add_module(root, Box::new(GaussianBlur::default())).unwrap();
    let after = pipeline.add_module(root, Box::new(Brightness::default())).unwrap();
    pipeline.set_param(blur, "sigma", -2.0).unwrap();

    let mut ctx = ProcessingContext::new("gradient", gradient());
    assert!(!pipeline.execute(&mut ctx, ExecuteOptions::new()));
    assert!(!pipeline.execute(&mut ctx, ExecuteOptions::new()));
    assert_eq!(pipeline.error_log().len(), 1);
    assert!(pipeline.error_log()[0].message.contains("failed"));
    assert!(pipeline.result_of(blur).is_some_and(NodeResult::is_failure));
    assert!(pipeline.result_of(after).is_none());
}

#[test]
fn shared_stop_handle_is_per_pipeline() {
    let f = fixture();
    let g = fixture();
    let flag: Arc<AtomicBool> = f.pipeline.stop_handle();
    flag.store(true, Ordering::Relaxed);
    assert!(!g.pipeline.stop_handle().load(Ordering::Relaxed));
}
