//! xlsx-kwfilter: keep the rows of a workbook that mention any of a set of
//! keywords, and append them to a results sheet of another workbook.

pub mod aggregator;
pub mod cli;
pub mod config;
pub mod error;
pub mod keywords;
pub mod matcher;
pub mod runner;
pub mod store;
pub mod table;
pub mod xlsx;


pub use config::RunConfig;
pub use error::{Error, RunError, Stage};
pub use runner::{RunState, Runner, Summary};
pub use store::{SheetStore, XlsxStore};

/// Runs one filter pass against `.xlsx` files on disk.
pub fn run(config: &RunConfig) -> Result<Summary, RunError> {
    Runner::new(config, &XlsxStore).run()
}
