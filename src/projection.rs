use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use anyhow::{Result, ensure};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::vector;

/// 作用在 oracle 原始嵌入之上的线性投影层，整个系统中唯一可训练的部分
///
/// 入库向量 = normalize(W·raw + b)，查询向量同样经过投影。
#[derive(Debug, Clone, PartialEq)]
pub struct LinearProjection {
    pub(crate) weight: Array2<f32>,
    pub(crate) bias: Array1<f32>,
}

/// 投影权重文件的序列化格式，weight 为行主序展开
#[derive(Serialize, Deserialize)]
struct SavedProjection {
    dim: usize,
    weight: Vec<f32>,
    bias: Vec<f32>,
}

impl LinearProjection {
    /// 单位投影：训练前保持 oracle 向量的原始几何结构
    pub fn identity(dim: usize) -> Self {
        Self { weight: Array2::eye(dim), bias: Array1::zeros(dim) }
    }

    /// 随机初始化，参数从 [-1/√dim, 1/√dim] 均匀采样
    pub fn random(dim: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let bound = 1.0 / (dim as f32).sqrt();
        let weight = Array2::from_shape_fn((dim, dim), |_| rng.random_range(-bound..bound));
        let bias = Array1::from_shape_fn(dim, |_| rng.random_range(-bound..bound));
        Self { weight, bias }
    }

    pub fn dim(&self) -> usize {
        self.bias.len()
    }

    /// W·x + b
    pub fn apply(&self, raw: ArrayView1<f32>) -> Array1<f32> {
        self.weight.dot(&raw) + &self.bias
    }

    /// 投影并归一化，结果可直接入库
    pub fn project_normalized(&self, raw: &[f32]) -> Result<Vec<f32>, StoreError> {
        if raw.len() != self.dim() {
            return Err(StoreError::Validation(format!(
                "原始向量维度为 {}，期望 {}",
                raw.len(),
                self.dim()
            )));
        }
        let projected = self.apply(ArrayView1::from(raw));
        vector::normalized(&projected.to_vec())
            .ok_or_else(|| StoreError::Validation("投影后向量模为零".to_owned()))
    }

    /// 保存权重，先写临时文件再重命名
    pub fn save(&self, path: &Path) -> Result<()> {
        let saved = SavedProjection {
            dim: self.dim(),
            weight: self.weight.iter().copied().collect(),
            bias: self.bias.to_vec(),
        };
        let tmp = path.with_extension("bin.tmp");
        let file = BufWriter::new(File::create(&tmp)?);
        bincode::serialize_into(file, &saved)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = BufReader::new(File::open(path)?);
        let saved: SavedProjection = bincode::deserialize_from(file)?;
        ensure!(
            saved.weight.len() == saved.dim * saved.dim && saved.bias.len() == saved.dim,
            "投影权重文件损坏: {}",
            path.display()
        );
        let weight = Array2::from_shape_vec((saved.dim, saved.dim), saved.weight)?;
        Ok(Self { weight, bias: Array1::from_vec(saved.bias) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{is_unit, normalized};

    #[test]
    fn test_identity_preserves_direction() {
        let projection = LinearProjection::identity(4);
        let raw = [3.0, 0.0, 0.0, 4.0];
        let projected = projection.project_normalized(&raw).unwrap();
        assert_eq!(projected, normalized(&raw).unwrap());
    }

    #[test]
    fn test_projected_is_unit() {
        let projection = LinearProjection::random(8, 7);
        let raw: Vec<f32> = (0..8).map(|i| i as f32 - 3.5).collect();
        let projected = projection.project_normalized(&raw).unwrap();
        assert!(is_unit(&projected));
    }

    #[test]
    fn test_random_is_reproducible() {
        assert_eq!(LinearProjection::random(16, 42), LinearProjection::random(16, 42));
        assert_ne!(LinearProjection::random(16, 42), LinearProjection::random(16, 43));
    }

    #[test]
    fn test_rejects_wrong_dim() {
        let projection = LinearProjection::identity(4);
        assert!(projection.project_normalized(&[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("projection.bin");

        let projection = LinearProjection::random(8, 1);
        projection.save(&path).unwrap();
        let loaded = LinearProjection::load(&path).unwrap();
        assert_eq!(projection, loaded);
    }
}
