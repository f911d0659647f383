use anyhow::Result;
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;

use crate::cli::SubCommandExtend;
use crate::config::OracleOptions;
use crate::{ImprintDBBuilder, Opts};

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    #[command(flatten)]
    pub oracle: OracleOptions,
    /// 输出文件路径
    #[arg(short, long, default_value = "embeddings.npy")]
    pub output: String,
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = ImprintDBBuilder::new(opts.conf_dir.clone())
            .dim(self.oracle.embedding_dim)
            .open()
            .await?;
        let data = db.export().await?;
        write_npy(&self.output, &data)?;
        info!("导出成功，共 {} 条原始嵌入", data.nrows());
        Ok(())
    }
}
