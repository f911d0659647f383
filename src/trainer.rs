use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::prelude::*;
use rayon::prelude::*;

use crate::errors::TrainingError;
use crate::miner::MinedPair;
use crate::projection::LinearProjection;

/// 每个并行梯度分片包含的样本对数量
///
/// 分片边界固定、分片内与分片间都按下标顺序求和，
/// 保证同一批数据训练结果与线程调度无关。
const GRAD_CHUNK: usize = 32;

/// 训练超参数
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    /// 每轮打乱样本顺序的随机种子，固定种子可完整复现训练过程
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self { epochs: 5, batch_size: 8, learning_rate: 1e-4, seed: 42 }
    }
}

/// 一次训练的结果
#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    /// 每个完整轮次的平均损失
    pub epoch_losses: Vec<f32>,
    pub pairs_total: usize,
    /// 两端原始向量都存在、实际参与训练的样本对数量
    pub pairs_used: usize,
    pub pairs_skipped: usize,
    /// 是否被协作取消
    pub cancelled: bool,
}

/// 训练器状态机：Idle → Fitting → Idle，损失发散时进入 Failed
///
/// Failed 不是终态，重新调用 fit 即可从当前参数继续。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    Fitting,
    Failed,
}

/// 协作式取消信号，fit 在每个 batch 之间检查一次
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// 投影训练器
///
/// 消费挖掘出的样本对，在 oracle 原始嵌入（而非库里可能已过期的投影
/// 向量）上微调线性投影。损失为以两端投影归一化后点积为 logit 的二元
/// 交叉熵，优化器为 Adam。训练本身不接触指纹库，训练完成后由调用方
/// 决定何时刷新库中向量。
pub struct ProjectionTrainer {
    projection: LinearProjection,
    state: TrainerState,
}

impl ProjectionTrainer {
    pub fn new(projection: LinearProjection) -> Self {
        Self { projection, state: TrainerState::Idle }
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn projection(&self) -> &LinearProjection {
        &self.projection
    }

    pub fn into_projection(self) -> LinearProjection {
        self.projection
    }

    /// 替换当前投影参数并回到 Idle，发散后恢复训练的入口
    pub fn set_projection(&mut self, projection: LinearProjection) {
        self.projection = projection;
        self.state = TrainerState::Idle;
    }

    /// 用样本对微调投影
    ///
    /// 参数：
    /// - pairs: 挖掘出的带标签样本对
    /// - raws: key 到 oracle 原始嵌入的映射，任一端缺失（或维度、数值
    ///   不合法）的样本对会被跳过并计入 pairs_skipped
    /// - opts: 超参数，Adam 状态每次调用重新初始化
    /// - cancel: 协作取消信号，取消时参数回滚到最近一个完整轮次
    ///
    /// 空训练集是正常稳态，直接返回零轮次的报告。任何 batch 损失出现
    /// 非有限值时立即终止，该 batch 的更新不会被应用。
    pub fn fit(
        &mut self,
        pairs: &[MinedPair],
        raws: &HashMap<String, Vec<f32>>,
        opts: &FitOptions,
        cancel: &CancelFlag,
    ) -> Result<TrainingReport, TrainingError> {
        self.state = TrainerState::Fitting;
        let dim = self.projection.dim();

        // 原始向量收拢成连续存储，样本对转成下标三元组
        let mut index_of = HashMap::new();
        let mut raw_vectors: Vec<Array1<f32>> = vec![];
        let mut resolved: Vec<(usize, usize, f32)> = vec![];
        for pair in pairs {
            let a = intern(&mut index_of, &mut raw_vectors, raws, &pair.anchor, dim);
            let b = intern(&mut index_of, &mut raw_vectors, raws, &pair.other, dim);
            match (a, b) {
                (Some(a), Some(b)) => resolved.push((a, b, pair.label as f32)),
                _ => debug!("样本对 ({}, {}) 缺少原始向量，跳过", pair.anchor, pair.other),
            }
        }

        let mut report = TrainingReport {
            pairs_total: pairs.len(),
            pairs_used: resolved.len(),
            pairs_skipped: pairs.len() - resolved.len(),
            ..TrainingReport::default()
        };
        if report.pairs_skipped > 0 {
            warn!("{} 个样本对缺少原始向量，已跳过", report.pairs_skipped);
        }
        if resolved.is_empty() {
            self.state = TrainerState::Idle;
            return Ok(report);
        }

        let mut rng = StdRng::seed_from_u64(opts.seed);
        let mut adam = AdamState::new(dim, opts.learning_rate);
        let mut indices = (0..resolved.len()).collect::<Vec<_>>();
        let batch_size = opts.batch_size.max(1);

        for epoch in 0..opts.epochs {
            // 轮首快照，取消时回滚到完整轮次边界
            let checkpoint = self.projection.clone();
            indices.shuffle(&mut rng);

            let mut loss_sum = 0f64;
            let mut batches = 0usize;
            for (batch_idx, batch) in indices.chunks(batch_size).enumerate() {
                if cancel.is_cancelled() {
                    self.projection = checkpoint;
                    self.state = TrainerState::Idle;
                    report.cancelled = true;
                    info!("训练在第 {} 轮被取消，参数回滚到上一个完整轮次", epoch + 1);
                    return Ok(report);
                }

                let (loss, grad_w, grad_b) =
                    batch_gradients(&self.projection, &raw_vectors, &resolved, batch);
                if !loss.is_finite() {
                    self.state = TrainerState::Failed;
                    return Err(TrainingError::Diverged { epoch: epoch + 1, batch: batch_idx + 1 });
                }

                adam.step(&mut self.projection, &grad_w, &grad_b);
                loss_sum += loss as f64;
                batches += 1;
            }

            let mean_loss = (loss_sum / batches as f64) as f32;
            info!("第 {}/{} 轮平均损失 {:.4}", epoch + 1, opts.epochs, mean_loss);
            report.epoch_losses.push(mean_loss);
        }

        self.state = TrainerState::Idle;
        Ok(report)
    }
}

/// 查找 key 对应的原始向量并登记下标，缺失或不合法返回 None
fn intern(
    index_of: &mut HashMap<String, usize>,
    raw_vectors: &mut Vec<Array1<f32>>,
    raws: &HashMap<String, Vec<f32>>,
    key: &str,
    dim: usize,
) -> Option<usize> {
    if let Some(&idx) = index_of.get(key) {
        return Some(idx);
    }
    let raw = raws.get(key)?;
    if raw.len() != dim || !crate::vector::all_finite(raw) {
        return None;
    }
    let idx = raw_vectors.len();
    raw_vectors.push(Array1::from_vec(raw.clone()));
    index_of.insert(key.to_owned(), idx);
    Some(idx)
}

/// 单个 batch 的平均损失与梯度
fn batch_gradients(
    projection: &LinearProjection,
    raw_vectors: &[Array1<f32>],
    resolved: &[(usize, usize, f32)],
    batch: &[usize],
) -> (f32, Array2<f32>, Array1<f32>) {
    let dim = projection.dim();
    let partials = batch
        .par_chunks(GRAD_CHUNK)
        .map(|chunk| {
            let mut loss = 0f32;
            let mut grad_w = Array2::zeros((dim, dim));
            let mut grad_b = Array1::zeros(dim);
            for &i in chunk {
                let (a, b, label) = resolved[i];
                let (l, gw, gb) = pair_gradients(
                    projection,
                    raw_vectors[a].view(),
                    raw_vectors[b].view(),
                    label,
                );
                loss += l;
                grad_w += &gw;
                grad_b += &gb;
            }
            (loss, grad_w, grad_b)
        })
        .collect::<Vec<_>>();

    let mut loss = 0f32;
    let mut grad_w = Array2::zeros((dim, dim));
    let mut grad_b = Array1::zeros(dim);
    for (l, gw, gb) in partials {
        loss += l;
        grad_w += &gw;
        grad_b += &gb;
    }
    let n = batch.len() as f32;
    (loss / n, grad_w / n, grad_b / n)
}

/// 单个样本对的损失与梯度
///
/// 前向：u = W·x + b，z = u / ‖u‖，logit = z_a·z_b；
/// 损失取数值稳定形式 max(s,0) − s·y + ln(1 + e^(−|s|))。
/// 反向依次穿过点积、归一化和仿射三层。
fn pair_gradients(
    projection: &LinearProjection,
    xa: ArrayView1<f32>,
    xb: ArrayView1<f32>,
    label: f32,
) -> (f32, Array2<f32>, Array1<f32>) {
    let ua = projection.apply(xa);
    let ub = projection.apply(xb);
    // 归一化分母的下限，防止零向量除零
    let na = norm(&ua).max(1e-12);
    let nb = norm(&ub).max(1e-12);
    let za = &ua / na;
    let zb = &ub / nb;

    let logit = za.dot(&zb);
    let loss = logit.max(0.0) - logit * label + (-logit.abs()).exp().ln_1p();
    let g_logit = sigmoid(logit) - label;

    let g_za = &zb * g_logit;
    let g_zb = &za * g_logit;
    // 归一化层的雅可比：g_u = (g_z − (g_z·z)·z) / ‖u‖
    let g_ua = (&g_za - &(&za * g_za.dot(&za))) / na;
    let g_ub = (&g_zb - &(&zb * g_zb.dot(&zb))) / nb;

    let grad_w = outer(&g_ua, xa) + outer(&g_ub, xb);
    let grad_b = g_ua + g_ub;
    (loss, grad_w, grad_b)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn norm(v: &Array1<f32>) -> f32 {
    v.dot(v).sqrt()
}

/// 外积 g·xᵀ
fn outer(g: &Array1<f32>, x: ArrayView1<f32>) -> Array2<f32> {
    let g = g.view().insert_axis(Axis(1));
    let x = x.insert_axis(Axis(0));
    g.dot(&x)
}

/// Adam 优化器状态，带偏差修正，每次 fit 重新初始化
struct AdamState {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    t: i32,
    m_w: Array2<f32>,
    v_w: Array2<f32>,
    m_b: Array1<f32>,
    v_b: Array1<f32>,
}

impl AdamState {
    fn new(dim: usize, lr: f32) -> Self {
        Self {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            t: 0,
            m_w: Array2::zeros((dim, dim)),
            v_w: Array2::zeros((dim, dim)),
            m_b: Array1::zeros(dim),
            v_b: Array1::zeros(dim),
        }
    }

    fn step(&mut self, projection: &mut LinearProjection, grad_w: &Array2<f32>, grad_b: &Array1<f32>) {
        self.t += 1;
        let bc1 = 1.0 - self.beta1.powi(self.t);
        let bc2 = 1.0 - self.beta2.powi(self.t);

        self.m_w = &self.m_w * self.beta1 + grad_w * (1.0 - self.beta1);
        self.v_w = &self.v_w * self.beta2 + &(grad_w * grad_w) * (1.0 - self.beta2);
        self.m_b = &self.m_b * self.beta1 + grad_b * (1.0 - self.beta1);
        self.v_b = &self.v_b * self.beta2 + &(grad_b * grad_b) * (1.0 - self.beta2);

        let step_w = (&self.m_w / bc1) / (self.v_w.mapv(f32::sqrt) / bc2.sqrt() + self.eps);
        let step_b = (&self.m_b / bc1) / (self.v_b.mapv(f32::sqrt) / bc2.sqrt() + self.eps);
        projection.weight = &projection.weight - &(step_w * self.lr);
        projection.bias = &projection.bias - &(step_b * self.lr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(anchor: &str, other: &str, label: u8) -> MinedPair {
        MinedPair { anchor: anchor.to_owned(), other: other.to_owned(), label }
    }

    /// 两簇可分向量：a/b 同簇，c/d 同簇且与前者近似正交
    fn separable_raws() -> HashMap<String, Vec<f32>> {
        HashMap::from([
            ("a".to_owned(), vec![1.0, 0.1, 0.0, 0.0]),
            ("b".to_owned(), vec![0.9, 0.2, 0.1, 0.0]),
            ("c".to_owned(), vec![0.0, 0.1, 1.0, 0.2]),
            ("d".to_owned(), vec![0.1, 0.0, 0.9, 0.1]),
        ])
    }

    fn separable_pairs() -> Vec<MinedPair> {
        vec![
            pair("a", "b", 1),
            pair("c", "d", 1),
            pair("a", "c", 0),
            pair("a", "d", 0),
            pair("b", "c", 0),
            pair("b", "d", 0),
        ]
    }

    #[test]
    fn test_fit_converges_on_separable_pairs() {
        let mut trainer = ProjectionTrainer::new(LinearProjection::identity(4));
        let opts = FitOptions { epochs: 60, batch_size: 2, learning_rate: 0.02, seed: 42 };
        let report = trainer
            .fit(&separable_pairs(), &separable_raws(), &opts, &CancelFlag::new())
            .unwrap();

        assert_eq!(report.pairs_used, 6);
        assert_eq!(report.epoch_losses.len(), 60);
        let first = report.epoch_losses[0];
        let last = *report.epoch_losses.last().unwrap();
        assert!(last < first, "损失未下降: {first} -> {last}");
        assert!(last < 0.5, "损失未收敛: {last}");
        assert_eq!(trainer.state(), TrainerState::Idle);
    }

    #[test]
    fn test_contradictory_labels_plateau_without_divergence() {
        // 同一对同时标成正负样本，最优解是 logit 为零，损失停在 ln2 附近
        let pairs = vec![pair("a", "b", 1), pair("a", "b", 0)];
        let mut trainer = ProjectionTrainer::new(LinearProjection::identity(4));
        let opts = FitOptions { epochs: 40, batch_size: 2, learning_rate: 0.02, seed: 42 };
        let report = trainer.fit(&pairs, &separable_raws(), &opts, &CancelFlag::new()).unwrap();

        assert!(report.epoch_losses.iter().all(|l| l.is_finite()));
        assert!(*report.epoch_losses.last().unwrap() < 0.75);
        assert_eq!(trainer.state(), TrainerState::Idle);
    }

    #[test]
    fn test_fit_is_reproducible_with_same_seed() {
        let opts = FitOptions { epochs: 5, batch_size: 2, learning_rate: 0.01, seed: 7 };
        let run = || {
            let mut trainer = ProjectionTrainer::new(LinearProjection::identity(4));
            trainer
                .fit(&separable_pairs(), &separable_raws(), &opts, &CancelFlag::new())
                .unwrap()
                .epoch_losses
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_divergence_fails_fast() {
        // 无穷大学习率让第一次更新产生 NaN 权重，第二个 batch 损失非有限
        let mut trainer = ProjectionTrainer::new(LinearProjection::identity(4));
        let opts =
            FitOptions { epochs: 1, batch_size: 1, learning_rate: f32::INFINITY, seed: 42 };
        let err = trainer
            .fit(&separable_pairs(), &separable_raws(), &opts, &CancelFlag::new())
            .unwrap_err();

        assert!(matches!(err, TrainingError::Diverged { epoch: 1, batch: 2 }));
        assert_eq!(trainer.state(), TrainerState::Failed);
    }

    #[test]
    fn test_diverging_update_is_not_applied() {
        // 权重里埋一个 NaN，第一个 batch 的损失就已非有限
        let mut poisoned = LinearProjection::identity(4);
        poisoned.weight[[0, 0]] = f32::NAN;
        let mut trainer = ProjectionTrainer::new(poisoned);
        let err = trainer
            .fit(&separable_pairs(), &separable_raws(), &FitOptions::default(), &CancelFlag::new())
            .unwrap_err();

        assert!(matches!(err, TrainingError::Diverged { epoch: 1, batch: 1 }));
        // 未应用任何更新，其余参数保持原值
        assert_eq!(trainer.projection().weight[[1, 1]], 1.0);
        assert!(trainer.projection().bias.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn test_refit_after_failure() {
        let mut trainer = ProjectionTrainer::new(LinearProjection::identity(4));
        let bad =
            FitOptions { epochs: 1, batch_size: 1, learning_rate: f32::INFINITY, seed: 42 };
        trainer.fit(&separable_pairs(), &separable_raws(), &bad, &CancelFlag::new()).unwrap_err();
        assert_eq!(trainer.state(), TrainerState::Failed);

        // Failed 不是终态，换一份参数即可继续训练
        trainer.set_projection(LinearProjection::identity(4));
        let good = FitOptions { epochs: 1, ..FitOptions::default() };
        trainer.fit(&separable_pairs(), &separable_raws(), &good, &CancelFlag::new()).unwrap();
        assert_eq!(trainer.state(), TrainerState::Idle);
    }

    #[test]
    fn test_empty_pairs_is_zero_epoch_success() {
        let mut trainer = ProjectionTrainer::new(LinearProjection::identity(4));
        let report = trainer
            .fit(&[], &separable_raws(), &FitOptions::default(), &CancelFlag::new())
            .unwrap();

        assert!(report.epoch_losses.is_empty());
        assert_eq!(report.pairs_total, 0);
        assert_eq!(trainer.state(), TrainerState::Idle);
    }

    #[test]
    fn test_pairs_without_raws_are_skipped() {
        let mut pairs = separable_pairs();
        pairs.push(pair("a", "ghost", 1));
        pairs.push(pair("ghost", "b", 0));
        let mut trainer = ProjectionTrainer::new(LinearProjection::identity(4));
        let report = trainer
            .fit(&pairs, &separable_raws(), &FitOptions::default(), &CancelFlag::new())
            .unwrap();

        assert_eq!(report.pairs_total, 8);
        assert_eq!(report.pairs_used, 6);
        assert_eq!(report.pairs_skipped, 2);
    }

    #[test]
    fn test_all_pairs_unresolvable_is_zero_epoch_success() {
        let pairs = vec![pair("ghost", "phantom", 1)];
        let mut trainer = ProjectionTrainer::new(LinearProjection::identity(4));
        let report = trainer
            .fit(&pairs, &separable_raws(), &FitOptions::default(), &CancelFlag::new())
            .unwrap();

        assert!(report.epoch_losses.is_empty());
        assert_eq!(report.pairs_skipped, 1);
        assert_eq!(trainer.state(), TrainerState::Idle);
    }

    #[test]
    fn test_cancellation_rolls_back_and_stays_idle() {
        let cancel = CancelFlag::new();
        cancel.cancel();

        let initial = LinearProjection::identity(4);
        let mut trainer = ProjectionTrainer::new(initial.clone());
        let report = trainer
            .fit(&separable_pairs(), &separable_raws(), &FitOptions::default(), &cancel)
            .unwrap();

        assert!(report.cancelled);
        assert!(report.epoch_losses.is_empty());
        assert_eq!(trainer.state(), TrainerState::Idle);
        assert_eq!(trainer.projection(), &initial);
    }
}
