use sqlx::{Executor, Result, Sqlite, SqlitePool};

use super::{FingerprintRow, RawVectorRecord};

/// 插入或更新指纹记录，返回记录 ID
///
/// key 冲突时只更新哈希并保留原有 ID，插入顺序因此不变
pub async fn upsert_fingerprint<'c, E>(executor: E, key: &str, hash: &str) -> Result<i64>
where
    E: Executor<'c, Database = Sqlite>,
{
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO fingerprint (key, hash)
        VALUES (?, ?)
        ON CONFLICT (key) DO UPDATE SET hash = excluded.hash
        RETURNING id
        "#,
    )
    .bind(key)
    .bind(hash)
    .fetch_one(executor)
    .await?;

    Ok(id)
}

/// 检查 key 是否已有指纹记录
pub async fn fingerprint_exists(executor: &SqlitePool, key: &str) -> Result<bool> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM fingerprint WHERE key = ?")
            .bind(key)
            .fetch_one(executor)
            .await?;

    Ok(count > 0)
}

/// 根据 key 查询指纹记录的 ID
pub async fn get_fingerprint_id(executor: &SqlitePool, key: &str) -> Result<Option<i64>> {
    sqlx::query_scalar("SELECT id FROM fingerprint WHERE key = ?")
        .bind(key)
        .fetch_optional(executor)
        .await
}

/// 插入或替换指纹对应的嵌入向量
pub async fn upsert_vector<'c, E>(executor: E, id: i64, raw: &[u8], projected: &[u8]) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO vector (id, raw, projected)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(id)
    .bind(raw)
    .bind(projected)
    .execute(executor)
    .await?;

    Ok(())
}

/// 只更新投影向量，原始向量保持不变
pub async fn update_projected<'c, E>(executor: E, id: i64, projected: &[u8]) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query("UPDATE vector SET projected = ? WHERE id = ?")
        .bind(projected)
        .bind(id)
        .execute(executor)
        .await?;

    Ok(())
}

/// 按插入顺序读出全部指纹和嵌入
pub async fn get_all_rows(executor: &SqlitePool) -> Result<Vec<FingerprintRow>> {
    sqlx::query_as(
        r#"
        SELECT key, hash, projected
        FROM fingerprint
        LEFT JOIN vector ON fingerprint.id = vector.id
        ORDER BY fingerprint.id ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// 按插入顺序读出全部原始嵌入
pub async fn get_raw_vectors(executor: &SqlitePool) -> Result<Vec<RawVectorRecord>> {
    sqlx::query_as(
        r#"
        SELECT fingerprint.id, key, raw
        FROM fingerprint
        JOIN vector ON fingerprint.id = vector.id
        ORDER BY fingerprint.id ASC
        "#,
    )
    .fetch_all(executor)
    .await
}

/// 按插入顺序读出所有没有嵌入的 key
pub async fn get_unembedded_keys(executor: &SqlitePool) -> Result<Vec<String>> {
    sqlx::query_scalar(
        r#"
        SELECT key
        FROM fingerprint
        LEFT JOIN vector ON fingerprint.id = vector.id
        WHERE vector.id IS NULL
        ORDER BY fingerprint.id ASC
        "#,
    )
    .fetch_all(executor)
    .await
}
