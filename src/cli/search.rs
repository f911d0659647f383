use std::convert::Infallible;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::task::block_in_place;

use crate::ImprintDBBuilder;
use crate::cli::SubCommandExtend;
use crate::config::{Opts, OracleOptions, SearchOptions};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub oracle: OracleOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 被查询的文件路径
    pub file: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", default_value = "table")]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let db = ImprintDBBuilder::new(opts.conf_dir.clone())
            .dim(self.oracle.embedding_dim)
            .open()
            .await?;

        let bytes = tokio::fs::read(&self.file).await?;
        let result = block_in_place(|| db.search(&bytes, self.search.count))?;

        print_result(&result, self)
    }
}

fn print_result(result: &[(f32, String)], opts: &SearchCommand) -> Result<()> {
    match opts.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for (score, key) in result {
                println!("{:.4}\t{}", score, key);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone)]
pub enum OutputFormat {
    Json,
    Table,
}

impl FromStr for OutputFormat {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            _ => unreachable!(),
        }
    }
}
