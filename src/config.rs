use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let proj_dirs = ProjectDirs::from("", "aloxaf", "imprint").expect("failed to get project dir");
    ConfDir { path: proj_dirs.config_dir().to_path_buf() }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap()
}

/// oracle 相关参数
#[derive(Parser, Debug, Clone)]
pub struct OracleOptions {
    /// 原始嵌入向量的维度
    #[arg(short = 'd', long, value_name = "DIM", default_value_t = 512)]
    pub embedding_dim: usize,
}

/// 搜索相关参数
#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 显示的结果数量
    #[arg(short = 'k', long, value_name = "COUNT", default_value_t = 5)]
    pub count: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imprint", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imprint 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 添加文件指纹到数据库
    Add(AddCommand),
    /// 为缺少嵌入的指纹补算嵌入
    Embed(EmbedCommand),
    /// 从数据库中搜索相似文件
    Search(SearchCommand),
    /// 挖掘样本对并微调投影
    Train(TrainCommand),
    /// 显示指纹库概况或单个指纹详情
    Show(ShowCommand),
    /// 导出全部原始嵌入
    Export(ExportCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("imprint.db")
    }

    /// 返回投影权重文件的路径
    pub fn projection(&self) -> PathBuf {
        self.path.join("projection.bin")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}
