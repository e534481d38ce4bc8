//! Harvest core: pure domain model for collections, records and run results.
mod collection;
mod input;
mod progress;
mod record;
mod result;
mod status;

pub use collection::{Collection, IntegrityReport, RepairReport, UpsertOutcome};
pub use input::{dedupe_preserving_order, parse_collection_names, parse_url_list};
pub use progress::{percentage, CollectionProgress, OverallProgress, ProgressSnapshot};
pub use record::{CollectionRecord, Fields};
pub use result::{CollectionResult, RunSummary};
pub use status::{UrlStatus, UnknownStatus};
