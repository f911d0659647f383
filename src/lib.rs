pub mod cli;
pub mod config;
mod db;
pub mod errors;
pub mod imdb;
mod metrics;
pub mod miner;
pub mod oracle;
pub mod projection;
pub mod ranker;
mod server;
pub mod store;
pub mod trainer;
pub mod utils;
pub mod vector;

pub use config::Opts;
pub use imdb::{ImprintDB, ImprintDBBuilder};
