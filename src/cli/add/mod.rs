use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use indicatif::ProgressBar;
use regex::Regex;
use tasks::*;

mod tasks;
mod types;

use crate::ImprintDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{OracleOptions, Opts};
use crate::utils::pb_style;

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    #[command(flatten)]
    pub oracle: OracleOptions,
    /// 文件所在目录，也支持扫描 tar 归档文件
    pub path: PathBuf,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,png,webp")]
    pub suffix: String,
    /// 在添加到数据库之前使用正则表达式对文件路径进行处理
    /// 例：--replace '/path/to/file/(?<name>[0-9]+).jpg' '$name'
    #[arg(short, long, value_names = ["REGEX", "REPLACE"], verbatim_doc_comment)]
    pub replace: Vec<String>,
    /// 只登记 key 和摘要，不计算嵌入，之后可用 embed 命令补算
    #[arg(long)]
    pub no_embed: bool,
    /// 如果指纹已存在，是否覆盖旧的记录
    #[arg(long)]
    pub overwrite: bool,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let re_suf = format!("(?i)({})", self.suffix.replace(',', "|"));
        let re_suf = Regex::new(&re_suf).expect("failed to build regex");
        let replace = if self.replace.is_empty() {
            None
        } else {
            let re = Regex::new(&self.replace[0]).expect("failed to build regex");
            Some((re, self.replace[1].clone()))
        };

        let db = Arc::new(
            ImprintDBBuilder::new(opts.conf_dir.clone())
                .dim(self.oracle.embedding_dim)
                .open()
                .await?,
        );

        let pb = ProgressBar::no_length().with_style(pb_style());

        let (t1, rx) = task_scan(self.path.clone(), pb.clone(), re_suf);
        let (t2, rx) = task_filter(rx, pb.clone(), db.clone(), self.overwrite, replace);
        if self.no_embed {
            let t3 = task_register(rx, pb.clone(), db);
            let _ = tokio::try_join!(t1, t2, t3);
        } else {
            let (t3, rx) = task_encode(rx, pb.clone(), db.clone());
            let t4 = task_add(rx, pb.clone(), db);
            let _ = tokio::try_join!(t1, t2, t3, t4);
        }

        pb.finish_with_message("指纹添加完成");

        Ok(())
    }
}
