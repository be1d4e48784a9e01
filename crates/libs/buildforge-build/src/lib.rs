//! Build Pipeline (C5): Gradle process supervision, archive extraction,
//! and the nine-stage build sequence that ties them to the Repo Guard,
//! Git Safety Layer, Log Bus, and Task Runtime of `buildforge-core`.

pub mod extractor;
pub mod gradle;
pub mod pipeline;

pub use extractor::{ArchiveExtractor, ExtractResult, FakeExtractor, ZipExtractor};
pub use gradle::{FakeGradleRunner, GradleLine, GradleOutcome, GradleRunner, TokioGradleRunner};
pub use pipeline::BuildPipeline;
