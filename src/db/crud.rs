use std::sync::LazyLock;

use futures::TryStreamExt;
use log::info;
use regex::Regex;
use sqlx::{Postgres, QueryBuilder, Row};

use super::Database;
use crate::error::{Error, Result};
use crate::store::StoreRow;
use crate::vtable::{self, COLUMNS, VectorRow};

/// 单条 INSERT 的行数上限，受 Postgres 的 65535 个绑定参数限制
const INSERT_CHUNK: usize = 500;

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("failed to build regex"));

/// 表名不能作为绑定参数传递，只允许普通标识符拼接进语句
fn check_ident(name: &str) -> Result<()> {
    if IDENT_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::SchemaValidation {
            row: 0,
            id: name.to_string(),
            reason: "非法的表名".to_string(),
        })
    }
}

/// 确保向量表和余弦相似度索引存在
///
/// `full_rescan` 表示采集端做了全量重扫，旧向量全部作废，直接重建表。
pub async fn ensure_schema(
    pool: &Database,
    table: &str,
    dim: usize,
    full_rescan: bool,
) -> Result<()> {
    check_ident(table)?;

    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector").execute(pool).await?;

    if full_rescan {
        info!("全量重扫模式，重建表 {table}");
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}")).execute(pool).await?;
    }

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            file_id TEXT PRIMARY KEY,
            filename TEXT,
            file_extension TEXT,
            folder_name TEXT,
            folder_url TEXT,
            direct_url TEXT,
            download_url TEXT,
            file_size TEXT,
            embedding VECTOR({dim}),
            modified_date TEXT,
            collection_timestamp TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {table}_embedding_idx \
         ON {table} USING hnsw (embedding vector_cosine_ops)"
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// 把一批向量行写入数据库
///
/// 先整批校验，再在一个事务里完成：建临时表、COPY 式批量写入、
/// 按 `file_id` 合并进正式表。任何一步失败整个事务回滚，正式表
/// 要么完整吸收这一批，要么保持原样。
pub async fn upsert_rows(pool: &Database, table: &str, rows: &[VectorRow]) -> Result<usize> {
    check_ident(table)?;
    vtable::validate_rows(rows)?;
    if rows.is_empty() {
        return Ok(0);
    }

    let staging = format!("{table}_staging");
    let cols = COLUMNS.join(", ");

    let mut tx = pool.begin().await?;

    sqlx::query(&format!(
        "CREATE TEMP TABLE {staging} \
         (LIKE {table} INCLUDING DEFAULTS EXCLUDING CONSTRAINTS) \
         ON COMMIT DROP"
    ))
    .execute(&mut *tx)
    .await?;

    for chunk in rows.chunks(INSERT_CHUNK) {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("INSERT INTO {staging} ({cols}) "));
        qb.push_values(chunk, |mut b, row| {
            b.push_bind(&row.file_id)
                .push_bind(&row.filename)
                .push_bind(&row.file_extension)
                .push_bind(&row.folder_name)
                .push_bind(&row.folder_url)
                .push_bind(&row.direct_url)
                .push_bind(&row.download_url)
                .push_bind(&row.file_size)
                .push_bind(&row.embedding)
                .push_unseparated("::vector")
                .push_bind(&row.modified_date)
                .push_bind(&row.collection_timestamp);
        });
        qb.build().execute(&mut *tx).await?;
    }

    let updates: Vec<String> = COLUMNS
        .iter()
        .filter(|c| **c != "file_id")
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();
    sqlx::query(&format!(
        "INSERT INTO {table} ({cols}) SELECT {cols} FROM {staging} \
         ON CONFLICT (file_id) DO UPDATE SET {}, updated_at = now()",
        updates.join(", ")
    ))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!("已合并 {} 行到表 {table}", rows.len());
    Ok(rows.len())
}

/// 表中的向量总数
pub async fn count_rows(pool: &Database, table: &str) -> Result<i64> {
    check_ident(table)?;
    let row = sqlx::query(&format!("SELECT COUNT(*) FROM {table}")).fetch_one(pool).await?;
    Ok(row.get(0))
}

/// 读出全表向量，按 `file_id` 排序保证加载顺序确定
pub async fn fetch_store_rows(pool: &Database, table: &str) -> Result<Vec<StoreRow>> {
    check_ident(table)?;

    let query =
        format!("SELECT file_id, filename, embedding::text FROM {table} ORDER BY file_id");
    let mut stream = sqlx::query(&query).fetch(pool);

    let mut result = vec![];
    while let Some(row) = stream.try_next().await? {
        let file_id: String = row.get(0);
        let filename: Option<String> = row.get(1);
        let embedding: Option<String> = row.get(2);

        let vector = embedding.as_deref().and_then(vtable::parse_vector).ok_or_else(|| {
            Error::SchemaValidation {
                row: result.len() + 1,
                id: file_id.clone(),
                reason: "数据库中的向量无法解析".to_string(),
            }
        })?;
        result.push(StoreRow { file_id, filename: filename.unwrap_or_default(), vector });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_restricted_to_identifiers() {
        assert!(check_ident("image_embeddings").is_ok());
        assert!(check_ident("_tmp2").is_ok());
        assert!(check_ident("bad-name").is_err());
        assert!(check_ident("x; DROP TABLE y").is_err());
        assert!(check_ident("").is_err());
    }
}
