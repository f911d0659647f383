use rayon::prelude::*;

use crate::errors::StoreError;
use crate::store::FingerprintStore;
use crate::vector;

/// 只读的相似度查询器
///
/// find_exact 负责内容哈希的完全匹配，find_similar 负责余弦相似度 top-k，
/// query 将两者组合成对外的统一入口。所有查询都不会修改指纹库。
pub struct SimilarityRanker<'a> {
    store: &'a FingerprintStore,
}

impl<'a> SimilarityRanker<'a> {
    pub fn new(store: &'a FingerprintStore) -> Self {
        Self { store }
    }

    /// 查找内容哈希完全相同的记录，按插入顺序返回，得分恒为 1.0
    pub fn find_exact(&self, hash: &str) -> Vec<(f32, String)> {
        self.store
            .entries()
            .into_iter()
            .filter(|item| item.hash == hash)
            .map(|item| (1.0, item.key))
            .collect()
    }

    /// 余弦相似度 top-k
    ///
    /// 参数：
    /// - query: 查询向量，维度必须与库一致，内部会先归一化
    /// - k: 返回的结果数量上限
    ///
    /// 得分相同时插入序号小的排前。没有嵌入向量的记录不参与排序。
    /// 全库线性扫描，复杂度与库大小成正比。
    pub fn find_similar(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(f32, String)>, StoreError> {
        if query.len() != self.store.dim() {
            return Err(StoreError::Validation(format!(
                "查询向量维度为 {}，期望 {}",
                query.len(),
                self.store.dim()
            )));
        }
        if !vector::all_finite(query) {
            return Err(StoreError::Validation("查询向量含非有限分量".to_owned()));
        }
        let query = vector::normalized(query)
            .ok_or_else(|| StoreError::Validation("查询向量模为零".to_owned()))?;

        let mut scored: Vec<(f32, u64, String)> = self
            .store
            .entries()
            .into_par_iter()
            .filter_map(|item| {
                let embedding = item.embedding?;
                Some((vector::dot(&query, &embedding), item.seq, item.key))
            })
            .collect();

        scored.sort_unstable_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(score, _, key)| (score, key)).collect())
    }

    /// 统一查询入口
    ///
    /// 先做精确匹配；命中即为最终结果，不再回退到相似度排序。
    /// 未命中时返回余弦相似度 top-k。空库返回空结果而不是错误。
    pub fn query(
        &self,
        hash: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<(f32, String)>, StoreError> {
        let exact = self.find_exact(hash);
        if !exact.is_empty() {
            return Ok(exact);
        }
        self.find_similar(embedding, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(items: &[(&str, &str, Option<&[f32]>)]) -> FingerprintStore {
        let store = FingerprintStore::new(4);
        for (key, hash, embedding) in items {
            store.add(key, hash, *embedding).unwrap();
        }
        store
    }

    #[test]
    fn test_query_empty_store() {
        let store = FingerprintStore::new(4);
        let ranker = SimilarityRanker::new(&store);
        let result = ranker.query("h", &[1.0, 0.0, 0.0, 0.0], 5).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_exact_match_takes_precedence() {
        // A 和 B 哈希相同但向量很不一样，C 哈希不同
        let store = store_with(&[
            ("a", "h1", Some(&[1.0, 0.0, 0.0, 0.0])),
            ("b", "h1", Some(&[0.0, 1.0, 0.0, 0.0])),
            ("c", "h2", Some(&[1.0, 0.0, 0.0, 0.0])),
        ]);
        let ranker = SimilarityRanker::new(&store);

        let result = ranker.query("h1", &[1.0, 0.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(result, vec![(1.0, "a".to_owned()), (1.0, "b".to_owned())]);
    }

    #[test]
    fn test_find_exact_insertion_order() {
        let store = store_with(&[("b", "h", None), ("a", "h", None), ("c", "x", None)]);
        let ranker = SimilarityRanker::new(&store);
        let keys: Vec<_> = ranker.find_exact("h").into_iter().map(|(_, k)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_find_similar_orders_by_score() {
        let store = store_with(&[
            ("far", "h1", Some(&[0.0, 1.0, 0.0, 0.0])),
            ("near", "h2", Some(&[1.0, 0.1, 0.0, 0.0])),
            ("same", "h3", Some(&[1.0, 0.0, 0.0, 0.0])),
        ]);
        let ranker = SimilarityRanker::new(&store);

        let result = ranker.find_similar(&[2.0, 0.0, 0.0, 0.0], 3).unwrap();
        let keys: Vec<_> = result.iter().map(|(_, k)| k.as_str()).collect();
        assert_eq!(keys, vec!["same", "near", "far"]);
        assert!((result[0].0 - 1.0).abs() < 1e-6);
        // 降序
        assert!(result[0].0 >= result[1].0 && result[1].0 >= result[2].0);
    }

    #[test]
    fn test_find_similar_tie_breaks_by_seq() {
        // 三条记录向量完全相同，得分并列，按插入顺序返回
        let emb: &[f32] = &[0.5, 0.5, 0.5, 0.5];
        let store = store_with(&[
            ("second", "h1", Some(emb)),
            ("first", "h2", Some(emb)),
            ("third", "h3", Some(emb)),
        ]);
        let ranker = SimilarityRanker::new(&store);

        let result = ranker.find_similar(emb, 3).unwrap();
        let keys: Vec<_> = result.iter().map(|(_, k)| k.as_str()).collect();
        assert_eq!(keys, vec!["second", "first", "third"]);
    }

    #[test]
    fn test_find_similar_skips_unembedded() {
        let store = store_with(&[
            ("no_emb", "h1", None),
            ("with_emb", "h2", Some(&[1.0, 0.0, 0.0, 0.0])),
        ]);
        let ranker = SimilarityRanker::new(&store);

        let result = ranker.find_similar(&[1.0, 0.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].1, "with_emb");
    }

    #[test]
    fn test_find_similar_truncates_to_k() {
        let store = store_with(&[
            ("a", "h1", Some(&[1.0, 0.0, 0.0, 0.0])),
            ("b", "h2", Some(&[0.0, 1.0, 0.0, 0.0])),
            ("c", "h3", Some(&[0.0, 0.0, 1.0, 0.0])),
        ]);
        let ranker = SimilarityRanker::new(&store);
        assert_eq!(ranker.find_similar(&[1.0, 1.0, 0.0, 0.0], 2).unwrap().len(), 2);
        assert!(ranker.find_similar(&[1.0, 1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_find_similar_rejects_bad_query() {
        let store = store_with(&[("a", "h1", Some(&[1.0, 0.0, 0.0, 0.0]))]);
        let ranker = SimilarityRanker::new(&store);
        assert!(matches!(
            ranker.find_similar(&[1.0, 0.0], 5),
            Err(StoreError::Validation(_))
        ));
        assert!(matches!(
            ranker.find_similar(&[0.0; 4], 5),
            Err(StoreError::Validation(_))
        ));
    }
}
