//! Scale engine: fits the embedded document into the viewport

mod engine;
pub mod fit;
pub mod measure;

pub use engine::{ScaleEngine, ScaleInfo, DOCUMENT_TTL};
pub use fit::{compute_scale, fit_transform, FitMode};
