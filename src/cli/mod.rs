mod add;
mod embed;
mod export;
mod search;
pub mod server;
mod show;
mod train;

pub use add::*;
pub use embed::*;
pub use export::*;
pub use search::*;
pub use server::*;
pub use show::*;
pub use train::*;

use crate::config::Opts;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
