use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::OracleOptions;
use crate::trainer::{CancelFlag, FitOptions, ProjectionTrainer};
use crate::{ImprintDBBuilder, Opts};

#[derive(Parser, Debug, Clone)]
pub struct TrainCommand {
    #[command(flatten)]
    pub oracle: OracleOptions,
    /// 每个锚点挖掘的正样本数量
    #[arg(short, long, default_value_t = 3)]
    pub positives: usize,
    /// 每个锚点挖掘的负样本数量
    #[arg(short, long, default_value_t = 3)]
    pub negatives: usize,
    /// 训练轮数
    #[arg(short, long, default_value_t = 5)]
    pub epochs: usize,
    /// 每个 batch 包含的样本对数量
    #[arg(short, long, default_value_t = 8)]
    pub batch_size: usize,
    /// 学习率
    #[arg(short, long, default_value_t = 1e-4)]
    pub learning_rate: f32,
    /// 打乱样本对用的随机种子
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// 只训练并打印损失，不保存投影也不刷新嵌入
    #[arg(long)]
    pub no_refresh: bool,
}

impl SubCommandExtend for TrainCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = ImprintDBBuilder::new(opts.conf_dir.clone())
            .dim(self.oracle.embedding_dim)
            .open()
            .await?;

        let pairs = db.mine_pairs(self.positives, self.negatives);
        if pairs.is_empty() {
            warn!("没有挖掘到任何样本对，跳过训练");
            return Ok(());
        }
        info!("挖掘到 {} 组样本对", pairs.len());

        let raws = db.raw_embeddings().await?;
        let fit_opts = FitOptions {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            seed: self.seed,
        };

        // Ctrl-C 触发协作取消，未完成轮次的进度会被丢弃
        let cancel = CancelFlag::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel2.cancel();
            }
        });

        let mut trainer = ProjectionTrainer::new(db.projection());
        let report = block_in_place(|| trainer.fit(&pairs, &raws, &fit_opts, &cancel))?;

        if report.cancelled {
            warn!("训练被取消，嵌入保持不变");
            return Ok(());
        }
        if let Some(loss) = report.epoch_losses.last() {
            info!("训练完成，最终平均损失 {:.4}", loss);
        }

        if self.no_refresh {
            info!("--no-refresh 已指定，投影和嵌入保持不变");
            return Ok(());
        }

        let refreshed = db.refresh_projection(trainer.into_projection()).await?;
        info!("已用新投影刷新 {} 条嵌入", refreshed);
        Ok(())
    }
}
