//! # Phenograph
//!
//! A pipeline engine for plant image analysis. A pipeline is a tree of
//! groups and modules: modules wrap a single image operator, groups combine
//! their children's outputs (chain them, AND/OR their masks, or run them side
//! by side). Results are memoized per node and per input image, so editing a
//! parameter only recomputes what comes after it.
//!
//! ## Core Features
//!
//! - **Merge Modes**: `none`, `chain`, `and`, `or` groups compose operators into masks
//! - **Memoization**: Each node keeps its last result until it or something before it changes
//! - **Source Resolution**: Groups read the original image, the nearest prior output or a given node
//! - **Grid Search**: Sweep operator parameters and preview every combination
//! - **JSON Documents**: Versioned save/load, plus import of legacy flat pipelines
//! - **Mosaics**: Tile named intermediate images into a single preview
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use phenograph::{ExecuteOptions, Pipeline, ProcessingContext, algorithms::*};
//! use phenograph::{MergeMode, SourceRef};
//!
//! let mut pipeline = Pipeline::builder()
//!     .name("Top view")
//!     .group("Fix image", MergeMode::Chain, SourceRef::OriginalInput)
//!     .module(Brightness::default())
//!     .group("Build mask", MergeMode::Chain, SourceRef::NearestPriorOutput)
//!     .module(Threshold::default())
//!     .module(MaskFeatures::default())
//!     .build()?;
//!
//! let mut ctx = ProcessingContext::from_path("plant.png")?;
//! let success = pipeline.execute(&mut ctx, ExecuteOptions::new());
//! println!("{success}: {:?}", ctx.features);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Loading Documents
//!
//! ```rust,no_run
//! use phenograph::{Pipeline, ToolRegistry};
//!
//! let registry = ToolRegistry::with_builtins();
//! let loaded = Pipeline::load("pipeline.json", &registry)?;
//! for issue in &loaded.issues {
//!     eprintln!("{issue}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod algorithms;
pub mod analysis;
pub mod context;
pub mod error;
pub mod grid;
pub mod io;
pub mod mosaic;
pub mod node;
pub mod params;
pub mod pipeline;
pub mod registry;
pub mod run;
pub mod settings;
pub mod traits;
pub mod tree;
pub mod types;

// Re-exports for convenience
pub use analysis::{InputIssue, check_inputs};
pub use context::{ProcessingContext, RegisteredRoi};
pub use error::{PipelineError, Result, ToolError};
pub use io::{LegacyConversion, LoadIssue, LoadedPipeline};
pub use node::{GroupNode, ModuleNode, Node, NodeClass, NodeId, NodeKind, SourceRef};
pub use params::{ToolParam, ToolParams};
pub use pipeline::{Pipeline, builder::PipelineBuilder};
pub use registry::ToolRegistry;
pub use run::{EventPayload, ExecuteOptions, ProgressEvent};
pub use settings::{MosaicSettings, PipelineSettings};
pub use traits::*;
pub use tree::NodeTree;
pub use types::*;
