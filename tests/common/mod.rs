//! Common test infrastructure
//!
//! In-memory sources stand in for the scraped sites and the metadata APIs,
//! while pipelines, loader and store are the real ones backed by a temporary
//! SQLite file. Tests should only import from this module, not from internal
//! submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestStore, FakeChartSource, us_chart_page};
//!
//! #[tokio::test]
//! async fn test_charts() {
//!     let store = TestStore::with_regions(&["US"]);
//!     let source = FakeChartSource::new().with_page("US", us_chart_page());
//!     // build a ChartsPipeline from store.reader(), store.loader() ...
//! }
//! ```

mod constants;
mod fakes;
mod fixtures;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fakes::{FakeChartSource, FakeCrossReference, FakeMetadataSource, FakeStatsSource};
#[allow(unused_imports)]
pub use fixtures::{chart_row, run_context, test_pool, us_chart_page, TestStore};
