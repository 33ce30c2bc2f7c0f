pub mod cleanup;
pub mod detection;
pub mod extraction;
pub mod features;
pub mod generators;
pub mod preprocessing;
pub mod roi;
pub mod shape;
pub mod simplification;

pub use cleanup::*;
pub use features::*;
pub use generators::*;
pub use preprocessing::*;
pub use roi::*;
pub use shape::ComplexShape;
