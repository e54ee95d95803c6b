pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod gap_fill;
pub mod index;
pub mod layout;
pub mod lock;
pub mod manager;
pub mod part_writer;
pub mod paths;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod s3;
pub mod scraper;
pub mod store;
pub mod sync;
pub mod warn;
