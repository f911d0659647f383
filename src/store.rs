use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::vector;

/// 一条指纹记录
#[derive(Debug, Clone)]
pub struct Fingerprint {
    /// 唯一 key，通常为规范化后的路径或 URL
    pub key: String,
    /// 内容哈希的十六进制摘要，算法由外部决定
    pub hash: String,
    /// 归一化后的嵌入向量，两阶段添加时可能尚未计算
    pub embedding: Option<Arc<[f32]>>,
    /// 插入序号，首次插入时分配，之后不再变化
    pub seq: u64,
}

impl Fingerprint {
    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }
}

/// 指纹库快照，条目按插入顺序排列，可直接序列化持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub dim: usize,
    pub entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub hash: String,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Default)]
struct Inner {
    items: HashMap<String, Fingerprint>,
    order: Vec<String>,
    dirty: bool,
}

/// 指纹库：key → (内容哈希, 嵌入向量) 的唯一事实来源
///
/// 单写多读，内部用读写锁保证读者不会看到写了一半的记录。
/// 本结构不做任何 IO，持久化由外部协作方通过 snapshot/restore 完成。
pub struct FingerprintStore {
    dim: usize,
    inner: RwLock<Inner>,
}

impl FingerprintStore {
    /// 创建一个空的指纹库，dim 为嵌入向量的固定维度
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "dim must be positive");
        Self { dim, inner: RwLock::new(Inner::default()) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// 添加或更新一条指纹
    ///
    /// 参数：
    /// - key: 唯一标识，重复添加视为更新，插入顺序保持首次插入时的位置
    /// - hash: 内容哈希，重复添加时总是覆盖
    /// - embedding: 可选的嵌入向量，校验后归一化存储；未提供时保留旧值
    pub fn add(
        &self,
        key: &str,
        hash: &str,
        embedding: Option<&[f32]>,
    ) -> Result<(), StoreError> {
        let embedding = embedding.map(|e| self.validated(key, e)).transpose()?;

        let mut guard = self.inner.write().expect("failed to acquire rw lock");
        let inner = &mut *guard;
        if let Some(item) = inner.items.get_mut(key) {
            let replaced = Fingerprint {
                key: item.key.clone(),
                hash: hash.to_owned(),
                embedding: embedding.or_else(|| item.embedding.clone()),
                seq: item.seq,
            };
            *item = replaced;
        } else {
            insert_new(inner, key, hash, embedding);
        }
        inner.dirty = true;
        Ok(())
    }

    /// 严格添加：key 已存在时返回 Duplicate 而不是更新
    pub fn add_new(
        &self,
        key: &str,
        hash: &str,
        embedding: Option<&[f32]>,
    ) -> Result<(), StoreError> {
        let embedding = embedding.map(|e| self.validated(key, e)).transpose()?;

        let mut guard = self.inner.write().expect("failed to acquire rw lock");
        let inner = &mut *guard;
        if inner.items.contains_key(key) {
            return Err(StoreError::Duplicate(key.to_owned()));
        }
        insert_new(inner, key, hash, embedding);
        inner.dirty = true;
        Ok(())
    }

    /// 更新已有指纹的嵌入向量，key 必须已经存在
    pub fn update_embedding(&self, key: &str, embedding: &[f32]) -> Result<(), StoreError> {
        let embedding = self.validated(key, embedding)?;

        let mut guard = self.inner.write().expect("failed to acquire rw lock");
        let inner = &mut *guard;
        let item =
            inner.items.get_mut(key).ok_or_else(|| StoreError::NotFound(key.to_owned()))?;
        let replaced = Fingerprint {
            key: item.key.clone(),
            hash: item.hash.clone(),
            embedding: Some(embedding),
            seq: item.seq,
        };
        *item = replaced;
        inner.dirty = true;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Fingerprint> {
        self.read().items.get(key).cloned()
    }

    /// 所有 key，按插入顺序
    pub fn keys(&self) -> Vec<String> {
        self.read().order.clone()
    }

    /// 所有记录，按插入顺序。嵌入向量为 Arc，克隆开销很小
    pub fn entries(&self) -> Vec<Fingerprint> {
        let guard = self.read();
        guard.order.iter().map(|key| guard.items[key].clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().order.is_empty()
    }

    /// 已有嵌入向量的记录数量
    pub fn embedded_len(&self) -> usize {
        self.read().items.values().filter(|item| item.has_embedding()).count()
    }

    pub fn is_dirty(&self) -> bool {
        self.read().dirty
    }

    pub fn mark_clean(&self) {
        self.inner.write().expect("failed to acquire rw lock").dirty = false;
    }

    /// 导出当前状态的快照
    pub fn snapshot(&self) -> StoreSnapshot {
        let guard = self.read();
        let entries = guard
            .order
            .iter()
            .map(|key| {
                let item = &guard.items[key];
                SnapshotEntry {
                    key: key.clone(),
                    hash: item.hash.clone(),
                    embedding: item.embedding.as_ref().map(|e| e.to_vec()),
                }
            })
            .collect();
        StoreSnapshot { dim: self.dim, entries }
    }

    /// 从快照整体恢复，完全替换内存状态
    ///
    /// 恢复前重新校验全部不变量：维度一致、key 不重复、向量有限且已单位化。
    /// 任何一条违反都会拒绝整个快照并保持原状态不变，不做静默修复。
    pub fn restore(&self, snapshot: StoreSnapshot) -> Result<(), StoreError> {
        if snapshot.dim != self.dim {
            return Err(StoreError::Validation(format!(
                "快照维度 {} 与库维度 {} 不符",
                snapshot.dim, self.dim
            )));
        }

        let mut items = HashMap::with_capacity(snapshot.entries.len());
        let mut order = Vec::with_capacity(snapshot.entries.len());
        for (seq, entry) in snapshot.entries.into_iter().enumerate() {
            if items.contains_key(&entry.key) {
                return Err(StoreError::Validation(format!("快照包含重复 key: {}", entry.key)));
            }
            let embedding = match entry.embedding {
                Some(e) => {
                    if e.len() != self.dim {
                        return Err(StoreError::Validation(format!(
                            "快照中 {} 的向量维度为 {}，期望 {}",
                            entry.key,
                            e.len(),
                            self.dim
                        )));
                    }
                    if !vector::all_finite(&e) {
                        return Err(StoreError::Validation(format!(
                            "快照中 {} 的向量含非有限分量",
                            entry.key
                        )));
                    }
                    if !vector::is_unit(&e) {
                        return Err(StoreError::Validation(format!(
                            "快照中 {} 的向量未单位化",
                            entry.key
                        )));
                    }
                    Some(Arc::from(e))
                }
                None => None,
            };
            order.push(entry.key.clone());
            items.insert(
                entry.key.clone(),
                Fingerprint { key: entry.key, hash: entry.hash, embedding, seq: seq as u64 },
            );
        }

        let mut guard = self.inner.write().expect("failed to acquire rw lock");
        *guard = Inner { items, order, dirty: true };
        Ok(())
    }

    fn validated(&self, key: &str, embedding: &[f32]) -> Result<Arc<[f32]>, StoreError> {
        if embedding.len() != self.dim {
            return Err(StoreError::Validation(format!(
                "{} 的向量维度为 {}，期望 {}",
                key,
                embedding.len(),
                self.dim
            )));
        }
        if !vector::all_finite(embedding) {
            return Err(StoreError::Validation(format!("{} 的向量含非有限分量", key)));
        }
        match vector::normalized(embedding) {
            Some(unit) => Ok(Arc::from(unit)),
            None => Err(StoreError::Validation(format!("{} 的向量模为零，无法归一化", key))),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().expect("failed to acquire rw lock")
    }
}

fn insert_new(inner: &mut Inner, key: &str, hash: &str, embedding: Option<Arc<[f32]>>) {
    let seq = inner.order.len() as u64;
    inner.items.insert(
        key.to_owned(),
        Fingerprint { key: key.to_owned(), hash: hash.to_owned(), embedding, seq },
    );
    inner.order.push(key.to_owned());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::is_unit;

    fn store() -> FingerprintStore {
        FingerprintStore::new(4)
    }

    #[test]
    fn test_add_normalizes_embedding() {
        let store = store();
        store.add("a", "h1", Some(&[3.0, 0.0, 0.0, 4.0])).unwrap();
        let emb = store.get("a").unwrap().embedding.unwrap();
        assert!(is_unit(&emb));
        assert!((emb[0] - 0.6).abs() < 1e-6);
        assert!((emb[3] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_add_rejects_wrong_dim() {
        let store = store();
        let err = store.add("a", "h1", Some(&[1.0, 2.0])).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_add_rejects_zero_norm() {
        let store = store();
        let err = store.add("a", "h1", Some(&[0.0; 4])).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_add_rejects_non_finite() {
        let store = store();
        let err = store.add("a", "h1", Some(&[1.0, f32::NAN, 0.0, 0.0])).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_upsert_keeps_insertion_order() {
        let store = store();
        store.add("a", "h1", None).unwrap();
        store.add("b", "h2", None).unwrap();
        // 重复添加 a：顺序不变，哈希更新
        store.add("a", "h3", Some(&[1.0, 0.0, 0.0, 0.0])).unwrap();

        assert_eq!(store.keys(), vec!["a", "b"]);
        assert_eq!(store.len(), 2);
        let a = store.get("a").unwrap();
        assert_eq!(a.hash, "h3");
        assert_eq!(a.seq, 0);
        assert!(a.has_embedding());
    }

    #[test]
    fn test_upsert_without_embedding_keeps_old_one() {
        let store = store();
        store.add("a", "h1", Some(&[1.0, 0.0, 0.0, 0.0])).unwrap();
        store.add("a", "h2", None).unwrap();
        let a = store.get("a").unwrap();
        assert_eq!(a.hash, "h2");
        assert!(a.has_embedding());
    }

    #[test]
    fn test_add_new_rejects_duplicate() {
        let store = store();
        store.add_new("a", "h1", None).unwrap();
        let err = store.add_new("a", "h2", None).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.get("a").unwrap().hash, "h1");
    }

    #[test]
    fn test_two_phase_add() {
        let store = store();
        store.add("a", "h1", None).unwrap();
        assert!(!store.get("a").unwrap().has_embedding());
        assert_eq!(store.embedded_len(), 0);

        store.update_embedding("a", &[0.0, 2.0, 0.0, 0.0]).unwrap();
        let emb = store.get("a").unwrap().embedding.unwrap();
        assert!(is_unit(&emb));
        assert_eq!(store.embedded_len(), 1);
    }

    #[test]
    fn test_update_embedding_unknown_key() {
        let store = store();
        let err = store.update_embedding("nope", &[1.0, 0.0, 0.0, 0.0]).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_entries_in_insertion_order() {
        let store = store();
        for (i, key) in ["c", "a", "b"].iter().enumerate() {
            store.add(key, "h", None).unwrap();
            assert_eq!(store.get(key).unwrap().seq, i as u64);
        }
        let keys: Vec<_> = store.entries().into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_snapshot_restore_roundtrip() {
        let store = store();
        store.add("a", "h1", Some(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        store.add("b", "h2", None).unwrap();
        store.add("c", "h3", Some(&[-1.0, 0.5, 0.0, 2.0])).unwrap();

        let snapshot = store.snapshot();
        let restored = FingerprintStore::new(4);
        restored.restore(snapshot.clone()).unwrap();

        // 逐位一致
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.keys(), store.keys());
        let original = store.get("c").unwrap().embedding.unwrap();
        let roundtrip = restored.get("c").unwrap().embedding.unwrap();
        assert_eq!(&*original, &*roundtrip);
    }

    #[test]
    fn test_restore_rejects_dim_mismatch() {
        let snapshot = FingerprintStore::new(4).snapshot();
        let store = FingerprintStore::new(8);
        assert!(matches!(store.restore(snapshot), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_restore_rejects_duplicate_key() {
        let entry = SnapshotEntry { key: "a".into(), hash: "h".into(), embedding: None };
        let snapshot = StoreSnapshot { dim: 4, entries: vec![entry.clone(), entry] };
        let store = store();
        assert!(matches!(store.restore(snapshot), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_restore_rejects_unnormalized_and_keeps_state() {
        let store = store();
        store.add("old", "h0", None).unwrap();

        let snapshot = StoreSnapshot {
            dim: 4,
            entries: vec![SnapshotEntry {
                key: "a".into(),
                hash: "h".into(),
                // 模为 2，不做静默修复
                embedding: Some(vec![2.0, 0.0, 0.0, 0.0]),
            }],
        };
        assert!(matches!(store.restore(snapshot), Err(StoreError::Validation(_))));
        assert_eq!(store.keys(), vec!["old"]);
    }

    #[test]
    fn test_dirty_flag() {
        let store = store();
        assert!(!store.is_dirty());
        store.add("a", "h1", None).unwrap();
        assert!(store.is_dirty());
        store.mark_clean();
        assert!(!store.is_dirty());
        store.update_embedding("a", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(store.is_dirty());
    }
}
