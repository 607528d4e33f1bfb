//! Extraction engine: archive inspection, variant selection, disk-image planning
//! and the on-disk extraction cache.

mod archive;
mod cache;
mod disk_image;
mod sevenzip;
mod variant;

pub use archive::{ArchiveInspector, ArchiveTool, ExtractionStage, PathKind};
pub use cache::{archive_identity, DirLease, ExpectedContents, ExtractionCache};
pub use disk_image::{plan, ExtractionPlan};
pub use sevenzip::SevenZipTool;
pub use variant::CountryWeights;

#[cfg(test)]
pub(crate) use archive::{ArchiveError, ExtractScope};
#[cfg(test)]
pub(crate) use cache::set_times;
