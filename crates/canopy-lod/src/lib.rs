//! Level-of-detail nodes: range-based child selection, paged child streaming
//! with expiry, and the database pager that serves their load requests.

mod lod;
pub mod metric;
mod paged_lod;
mod pager;

pub use lod::{CenterMode, LodNode};
pub use metric::{Range, RangeMode};
pub use paged_lod::{MAX_PAGED_SLOTS, PagedLodNode, PerRangeData, SlotState};
pub use pager::{DatabasePager, MergeReport, PagerSettings, TileReader, find_paged_lod};
