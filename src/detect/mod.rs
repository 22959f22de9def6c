mod result;
mod source;

pub use result::{Detection, DetectionBatch, TrackId};
pub use source::{DefaultHeadcount, DetectionSource, JsonLinesSource};
