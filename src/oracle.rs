/// 原始嵌入的来源
///
/// oracle 对同一输入必须永远返回同一向量，这是训练和刷新流程的前提。
/// 返回值不要求归一化，入库前由投影层统一归一化。
pub trait EmbeddingOracle: Send + Sync {
    /// 输出向量的维度
    fn dim(&self) -> usize;

    /// 对原始字节计算确定性的原始嵌入
    fn embed(&self, bytes: &[u8]) -> Vec<f32>;
}

/// 内容的 blake3 十六进制摘要，作为精确匹配指纹
pub fn content_digest(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// 每个分块覆盖的字节数
const CHUNK_BYTES: usize = 64;

/// 基于 blake3 的特征散列 oracle
///
/// 输入按 64 字节分块，每块摘要的若干段决定落入哪些桶以及带符号的
/// 增量，整体摘要额外散一轮，保证空输入也得到非零向量。完全确定，
/// 不依赖任何模型文件。
pub struct FeatureHashOracle {
    dim: usize,
}

impl FeatureHashOracle {
    pub fn new(dim: usize) -> Self {
        assert!(dim > 0, "oracle 维度必须大于零");
        Self { dim }
    }
}

impl EmbeddingOracle for FeatureHashOracle {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, bytes: &[u8]) -> Vec<f32> {
        let mut vector = vec![0f32; self.dim];
        scatter(&mut vector, blake3::hash(bytes).as_bytes());
        for chunk in bytes.chunks(CHUNK_BYTES) {
            scatter(&mut vector, blake3::hash(chunk).as_bytes());
        }
        vector
    }
}

/// 摘要每 8 字节拆成一段，段的低位选桶，最高位定符号
fn scatter(vector: &mut [f32], digest: &[u8; 32]) {
    for part in digest.chunks_exact(8) {
        let x = u64::from_le_bytes(part.try_into().expect("digest chunk cannot convert to u64"));
        let bucket = (x % vector.len() as u64) as usize;
        let sign = if x >> 63 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_is_deterministic() {
        let oracle = FeatureHashOracle::new(64);
        let data = b"the same bytes in, the same vector out";
        assert_eq!(oracle.embed(data), oracle.embed(data));
    }

    #[test]
    fn test_embed_has_requested_dim() {
        for dim in [8, 64, 512] {
            let oracle = FeatureHashOracle::new(dim);
            assert_eq!(oracle.embed(b"abc").len(), dim);
        }
    }

    #[test]
    fn test_embed_distinguishes_inputs() {
        let oracle = FeatureHashOracle::new(64);
        assert_ne!(oracle.embed(b"left"), oracle.embed(b"right"));
    }

    #[test]
    fn test_empty_input_is_nonzero() {
        let oracle = FeatureHashOracle::new(64);
        assert!(oracle.embed(b"").iter().any(|&x| x != 0.0));
    }

    #[test]
    fn test_content_digest_is_hex() {
        let digest = content_digest(b"imprint");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, content_digest(b"imprint"));
    }
}
