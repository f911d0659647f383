use thiserror::Error;

/// 指纹库操作错误
///
/// 只用于描述调用方传入的非法输入，空库、缺失向量等正常状态不会报错
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// 向量维度不符、含非有限分量或模为零
    #[error("非法向量: {0}")]
    Validation(String),
    /// key 不存在
    #[error("key 不存在: {0}")]
    NotFound(String),
    /// 严格添加模式下 key 已存在
    #[error("key 已存在: {0}")]
    Duplicate(String),
}

/// 训练错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrainingError {
    /// 损失出现非有限值，本次训练终止，投影保持最后一次有效参数
    #[error("第 {epoch} 轮第 {batch} 批损失发散")]
    Diverged { epoch: usize, batch: usize },
    /// 训练集为空
    #[error("训练集为空")]
    EmptyInput,
}
