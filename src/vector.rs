use bytemuck::{cast_slice, pod_collect_to_vec};

/// 归一化误差容忍度，用于校验向量是否已经单位化
pub const NORM_TOLERANCE: f32 = 1e-3;

#[inline(always)]
pub fn dot(va: &[f32], vb: &[f32]) -> f32 {
    debug_assert_eq!(va.len(), vb.len());
    va.iter().zip(vb).map(|(a, b)| a * b).sum()
}

#[inline(always)]
pub fn norm_l2(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

#[inline(always)]
pub fn all_finite(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// 向量是否已经单位化（允许 NORM_TOLERANCE 的误差）
#[inline]
pub fn is_unit(v: &[f32]) -> bool {
    (norm_l2(v) - 1.0).abs() <= NORM_TOLERANCE
}

/// 归一化向量，返回单位化后的副本
///
/// 模为 0（或过于接近 0）的向量无法归一化，返回 None
pub fn normalized(v: &[f32]) -> Option<Vec<f32>> {
    let norm = norm_l2(v);
    if norm <= f32::EPSILON {
        return None;
    }
    Some(v.iter().map(|x| x / norm).collect())
}

/// 将 f32 向量编码为字节串，用于存入 BLOB 字段
pub fn to_blob(v: &[f32]) -> Vec<u8> {
    cast_slice(v).to_vec()
}

/// 从 BLOB 字节串解码 f32 向量，长度不对齐时返回 None
pub fn from_blob(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % size_of::<f32>() != 0 {
        return None;
    }
    Some(pod_collect_to_vec(blob))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_orthogonal() {
        let va = [1.0, 0.0, 0.0];
        let vb = [0.0, 1.0, 0.0];
        assert_eq!(dot(&va, &vb), 0.0);
    }

    #[test]
    fn test_dot_identical_unit() {
        let v = normalized(&[3.0, 4.0]).unwrap();
        assert!((dot(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalized_zero_vector() {
        assert!(normalized(&[0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_normalized_is_unit() {
        let v = normalized(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert!(is_unit(&v));
    }

    #[test]
    fn test_blob_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.75];
        let blob = to_blob(&v);
        assert_eq!(from_blob(&blob), Some(v));
    }

    #[test]
    fn test_blob_bad_length() {
        assert!(from_blob(&[0u8; 7]).is_none());
    }
}
