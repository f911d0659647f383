use anyhow::{Result, bail};
use clap::Parser;

use crate::ImprintDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{Opts, OracleOptions};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    #[command(flatten)]
    pub oracle: OracleOptions,
    /// 指定 key 时显示单条指纹详情，否则显示整库概况
    pub key: Option<String>,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = ImprintDBBuilder::new(opts.conf_dir.clone())
            .dim(self.oracle.embedding_dim)
            .open()
            .await?;

        match &self.key {
            Some(key) => {
                let Some(item) = db.get(key) else {
                    bail!("指纹 {} 不存在", key);
                };
                println!("key : {}", item.key);
                println!("hash: {}", item.hash);
                println!("seq : {}", item.seq);
                match &item.embedding {
                    Some(embedding) => {
                        let head = embedding
                            .iter()
                            .take(8)
                            .map(|x| format!("{x:.4}"))
                            .collect::<Vec<_>>()
                            .join(", ");
                        println!("embedding: [{head}, ...] ({} 维)", embedding.len());
                    }
                    None => println!("embedding: 未计算"),
                }
            }
            None => {
                let stats = db.stats();
                println!("指纹总数: {}", stats.total);
                println!("已有嵌入: {}", stats.embedded);
                println!("嵌入维度: {}", stats.dim);
            }
        }
        Ok(())
    }
}
