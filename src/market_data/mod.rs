pub mod bar_cache;
pub mod bucketer;
pub mod live_merger;

pub use bar_cache::{LastBarCache, PaginationCursor};
pub use bucketer::{Bucketer, EnrichedAggregation, EnrichedRow, KlineAggregation, KlineRow};
pub use live_merger::LiveBarMerger;
