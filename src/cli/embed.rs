use clap::Parser;
use indicatif::{ProgressBar, ProgressIterator};
use log::info;

use crate::ImprintDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{OracleOptions, Opts};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct EmbedCommand {
    #[command(flatten)]
    pub oracle: OracleOptions,
}

impl SubCommandExtend for EmbedCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = ImprintDBBuilder::new(opts.conf_dir.clone())
            .dim(self.oracle.embedding_dim)
            .open()
            .await?;

        let keys = db.unembedded_keys().await?;
        if keys.is_empty() {
            info!("没有缺少嵌入的指纹");
            return Ok(());
        }

        let pb = ProgressBar::new(keys.len() as u64).with_style(pb_style());
        let mut embedded = 0usize;
        // key 按文件路径解释，读不到的文件跳过并保持未嵌入状态
        for key in keys.iter().progress_with(pb.clone()) {
            match tokio::fs::read(key).await {
                Ok(bytes) => {
                    db.embed(key, &bytes).await?;
                    embedded += 1;
                }
                Err(e) => pb.println(format!("读取失败: {}: {}", key, e)),
            }
        }
        pb.finish_with_message("补算完成");

        info!("共补算 {}/{} 条嵌入", embedded, keys.len());
        Ok(())
    }
}
