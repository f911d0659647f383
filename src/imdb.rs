use std::collections::HashMap;
use std::fs;
use std::sync::RwLock;
use std::time::Instant;

use anyhow::{Result, anyhow, ensure};
use log::{debug, info};
use ndarray::{Array2, ArrayView, Axis};

use crate::config::ConfDir;
use crate::db::{Database, crud, init_db};
use crate::errors::StoreError;
use crate::metrics;
use crate::miner::{MinedPair, PairMiner};
use crate::oracle::{EmbeddingOracle, FeatureHashOracle, content_digest};
use crate::projection::LinearProjection;
use crate::ranker::SimilarityRanker;
use crate::store::{Fingerprint, FingerprintStore, SnapshotEntry, StoreSnapshot};
use crate::vector;

/// 编码后尚未入库的指纹
pub struct EncodedFingerprint {
    /// 内容摘要
    pub digest: String,
    /// oracle 原始嵌入
    pub raw: Vec<f32>,
    /// 投影并归一化后的嵌入
    pub projected: Vec<f32>,
}

/// 指纹库概况
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub total: usize,
    pub embedded: usize,
    pub dim: usize,
    pub dirty: bool,
}

/// ImprintDB 的构建器
pub struct ImprintDBBuilder {
    conf_dir: ConfDir,
    oracle: Box<dyn EmbeddingOracle>,
}

impl ImprintDBBuilder {
    /// 默认使用 512 维特征散列 oracle
    pub fn new(conf_dir: ConfDir) -> Self {
        Self { conf_dir, oracle: Box::new(FeatureHashOracle::new(512)) }
    }

    /// 使用指定维度的特征散列 oracle
    pub fn dim(mut self, dim: usize) -> Self {
        self.oracle = Box::new(FeatureHashOracle::new(dim));
        self
    }

    /// 替换嵌入来源
    pub fn oracle(mut self, oracle: Box<dyn EmbeddingOracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// 打开数据库并把持久化的指纹全部恢复到内存
    pub async fn open(self) -> Result<ImprintDB> {
        fs::create_dir_all(self.conf_dir.path())?;
        let db = init_db(self.conf_dir.database()).await?;
        let dim = self.oracle.dim();

        let projection_path = self.conf_dir.projection();
        let projection = if projection_path.exists() {
            let projection = LinearProjection::load(&projection_path)?;
            ensure!(
                projection.dim() == dim,
                "投影维度 {} 与 oracle 维度 {} 不一致",
                projection.dim(),
                dim
            );
            info!("加载投影权重: {}", projection_path.display());
            projection
        } else {
            debug!("投影权重不存在，使用单位投影");
            LinearProjection::identity(dim)
        };

        let rows = crud::get_all_rows(&db).await?;
        let entries = rows
            .into_iter()
            .map(|row| {
                let embedding = match row.projected {
                    Some(blob) => Some(
                        vector::from_blob(&blob)
                            .ok_or_else(|| anyhow!("指纹 {} 的投影向量损坏", row.key))?,
                    ),
                    None => None,
                };
                Ok(SnapshotEntry { key: row.key, hash: row.hash, embedding })
            })
            .collect::<Result<Vec<_>>>()?;

        let store = FingerprintStore::new(dim);
        store.restore(StoreSnapshot { dim, entries })?;
        store.mark_clean();
        info!("加载 {} 条指纹，其中 {} 条已有嵌入", store.len(), store.embedded_len());

        Ok(ImprintDB {
            conf_dir: self.conf_dir,
            db,
            store,
            projection: RwLock::new(projection),
            oracle: self.oracle,
        })
    }
}

/// 指纹库、持久化和编码管线的统一入口
///
/// 内存中的 FingerprintStore 是查询的唯一事实来源，sqlite 只负责
/// 重启后恢复。两边的写入顺序固定为先内存后数据库。
pub struct ImprintDB {
    conf_dir: ConfDir,
    db: Database,
    store: FingerprintStore,
    projection: RwLock<LinearProjection>,
    oracle: Box<dyn EmbeddingOracle>,
}

impl ImprintDB {
    pub fn dim(&self) -> usize {
        self.store.dim()
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// 当前投影参数的副本
    pub fn projection(&self) -> LinearProjection {
        self.projection.read().expect("failed to acquire rw lock").clone()
    }

    /// 对原始内容做一次完整编码：摘要、oracle 嵌入、投影归一化
    pub fn encode(&self, bytes: &[u8]) -> Result<EncodedFingerprint, StoreError> {
        let digest = content_digest(bytes);
        let raw = self.oracle.embed(bytes);
        let projected = self
            .projection
            .read()
            .expect("failed to acquire rw lock")
            .project_normalized(&raw)?;
        Ok(EncodedFingerprint { digest, raw, projected })
    }

    /// 添加一条已编码的指纹，key 已存在时更新
    pub async fn insert(&self, key: &str, encoded: &EncodedFingerprint) -> Result<()> {
        self.store.add(key, &encoded.digest, Some(&encoded.projected))?;
        let id = crud::upsert_fingerprint(&self.db, key, &encoded.digest).await?;
        crud::upsert_vector(
            &self.db,
            id,
            &vector::to_blob(&encoded.raw),
            &vector::to_blob(&encoded.projected),
        )
        .await?;
        Ok(())
    }

    /// 添加文件内容指纹
    pub async fn add(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let encoded = self.encode(bytes)?;
        self.insert(key, &encoded).await
    }

    /// 两阶段添加的第一阶段：只登记 key 和摘要，不计算嵌入
    ///
    /// key 已有嵌入时保留旧的嵌入向量，只更新摘要。
    pub async fn add_unembedded(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let digest = content_digest(bytes);
        self.store.add(key, &digest, None)?;
        crud::upsert_fingerprint(&self.db, key, &digest).await?;
        Ok(())
    }

    /// 两阶段添加的第二阶段：为已登记的 key 补算嵌入
    pub async fn embed(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let raw = self.oracle.embed(bytes);
        let projected = self
            .projection
            .read()
            .expect("failed to acquire rw lock")
            .project_normalized(&raw)?;
        self.store.update_embedding(key, &projected)?;

        let id = crud::get_fingerprint_id(&self.db, key)
            .await?
            .ok_or_else(|| anyhow!("指纹 {key} 不在数据库中"))?;
        crud::upsert_vector(&self.db, id, &vector::to_blob(&raw), &vector::to_blob(&projected))
            .await?;
        Ok(())
    }

    /// 没有嵌入的 key 列表，按插入顺序
    pub async fn unembedded_keys(&self) -> Result<Vec<String>> {
        Ok(crud::get_unembedded_keys(&self.db).await?)
    }

    pub async fn contains(&self, key: &str) -> Result<bool> {
        Ok(crud::fingerprint_exists(&self.db, key).await?)
    }

    pub fn get(&self, key: &str) -> Option<Fingerprint> {
        self.store.get(key)
    }

    /// 搜索一段内容，返回 (相似度, key) 列表
    ///
    /// 精确命中时返回全部同哈希记录，相似度恒为 1.0，不再回退；
    /// 否则按余弦相似度返回 top-k。
    pub fn search(&self, bytes: &[u8], count: usize) -> Result<Vec<(f32, String)>> {
        let encoded = self.encode(bytes)?;
        let start = Instant::now();
        let ranker = SimilarityRanker::new(&self.store);

        let exact = ranker.find_exact(&encoded.digest);
        let (kind, result) = if exact.is_empty() {
            ("similar", ranker.find_similar(&encoded.projected, count)?)
        } else {
            ("exact", exact)
        };

        metrics::inc_query_count(kind);
        metrics::observe_query_duration(kind, start.elapsed().as_secs_f32());
        if let Some((score, _)) = result.first() {
            metrics::observe_query_top_score(kind, *score);
        }
        debug!("{} 查询耗时 {:.2}ms", kind, start.elapsed().as_secs_f64() * 1000.0);

        Ok(result)
    }

    /// 以全部指纹为锚点挖掘训练样本对
    pub fn mine_pairs(&self, positives: usize, negatives: usize) -> Vec<MinedPair> {
        let keys = self.store.keys();
        PairMiner::new(&self.store).mine_pairs(&keys, positives, negatives)
    }

    /// key 到 oracle 原始嵌入的映射，训练时使用
    pub async fn raw_embeddings(&self) -> Result<HashMap<String, Vec<f32>>> {
        let rows = crud::get_raw_vectors(&self.db).await?;
        rows.into_iter()
            .map(|row| {
                let raw = vector::from_blob(&row.raw)
                    .ok_or_else(|| anyhow!("指纹 {} 的原始向量损坏", row.key))?;
                Ok((row.key, raw))
            })
            .collect()
    }

    /// 替换投影参数并重算全部嵌入
    ///
    /// 权重先落盘，再按插入顺序逐条重投影。刷新过程中的查询可能
    /// 看到新旧嵌入混用的结果，刷新结束后恢复一致。
    pub async fn refresh_projection(&self, projection: LinearProjection) -> Result<usize> {
        ensure!(
            projection.dim() == self.dim(),
            "投影维度 {} 与库维度 {} 不一致",
            projection.dim(),
            self.dim()
        );
        projection.save(&self.conf_dir.projection())?;

        let rows = crud::get_raw_vectors(&self.db).await?;
        let total = rows.len();
        let mut tx = self.db.begin().await?;
        for row in &rows {
            let raw = vector::from_blob(&row.raw)
                .ok_or_else(|| anyhow!("指纹 {} 的原始向量损坏", row.key))?;
            let projected = projection.project_normalized(&raw)?;
            self.store.update_embedding(&row.key, &projected)?;
            crud::update_projected(&mut *tx, row.id, &vector::to_blob(&projected)).await?;
        }
        tx.commit().await?;

        *self.projection.write().expect("failed to acquire rw lock") = projection;
        info!("投影刷新完成，共更新 {} 条嵌入", total);
        Ok(total)
    }

    /// 全部原始嵌入拼成二维数组，供离线分析使用
    pub async fn export(&self) -> Result<Array2<f32>> {
        let rows = crud::get_raw_vectors(&self.db).await?;
        let mut arr = Array2::zeros((0, self.dim()));
        for row in &rows {
            let raw = vector::from_blob(&row.raw)
                .ok_or_else(|| anyhow!("指纹 {} 的原始向量损坏", row.key))?;
            arr.push(Axis(0), ArrayView::from(&raw[..]))?;
        }
        Ok(arr)
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            total: self.store.len(),
            embedded: self.store.embedded_len(),
            dim: self.dim(),
            dirty: self.store.is_dirty(),
        }
    }
}
