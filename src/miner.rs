use rayon::prelude::*;

use crate::store::FingerprintStore;
use crate::vector;

/// 一条挖掘出的训练样本对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinedPair {
    pub anchor: String,
    pub other: String,
    /// 1 = 相似，0 = 不相似
    pub label: u8,
}

/// 从指纹库当前的相似度结构中挖掘自监督训练对，不需要外部标签
pub struct PairMiner<'a> {
    store: &'a FingerprintStore,
}

impl<'a> PairMiner<'a> {
    pub fn new(store: &'a FingerprintStore) -> Self {
        Self { store }
    }

    /// 为每个锚点挖掘正负样本对
    ///
    /// 参数：
    /// - candidates: 候选 key 列表，锚点按此顺序遍历
    /// - pos_per_anchor: 每个锚点取相似度最高的前 n 个，标签为 1
    /// - neg_per_anchor: 每个锚点取相似度最低的后 n 个，标签为 0
    ///
    /// 不在库中或没有嵌入向量的锚点直接跳过。相似度相同时按插入
    /// 序号升序排。输出按锚点分组，组内正样本在前，负样本保持
    /// 相似度降序，对固定的库状态和候选列表完全确定。
    ///
    /// NOTE: 候选数量不足 pos + neg + 1 时首尾切片会重叠，同一对
    /// 会以两种标签各出现一次。这里刻意保留该行为，不做去重。
    pub fn mine_pairs(
        &self,
        candidates: &[String],
        pos_per_anchor: usize,
        neg_per_anchor: usize,
    ) -> Vec<MinedPair> {
        let fingerprints: Vec<_> = candidates.iter().map(|key| self.store.get(key)).collect();

        let groups: Vec<Vec<MinedPair>> = fingerprints
            .par_iter()
            .map(|anchor| {
                let Some(anchor) = anchor else {
                    return vec![];
                };
                let Some(anchor_emb) = &anchor.embedding else {
                    return vec![];
                };

                let mut scored: Vec<(f32, u64, &str)> = fingerprints
                    .iter()
                    .flatten()
                    .filter(|other| other.key != anchor.key)
                    .filter_map(|other| {
                        let embedding = other.embedding.as_ref()?;
                        Some((vector::dot(anchor_emb, embedding), other.seq, other.key.as_str()))
                    })
                    .collect();
                if scored.is_empty() {
                    return vec![];
                }
                scored.sort_unstable_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

                let mut pairs = Vec::with_capacity(pos_per_anchor + neg_per_anchor);
                for (_, _, other) in scored.iter().take(pos_per_anchor) {
                    pairs.push(MinedPair {
                        anchor: anchor.key.clone(),
                        other: (*other).to_owned(),
                        label: 1,
                    });
                }
                let neg_start = scored.len().saturating_sub(neg_per_anchor);
                for (_, _, other) in &scored[neg_start..] {
                    pairs.push(MinedPair {
                        anchor: anchor.key.clone(),
                        other: (*other).to_owned(),
                        label: 0,
                    });
                }
                pairs
            })
            .collect();

        groups.into_iter().flatten().collect()
    }
}
