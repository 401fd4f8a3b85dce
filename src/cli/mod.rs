mod embed;
mod eval;
mod search;
mod server;
mod upload;

pub use embed::*;
pub use eval::*;
pub use search::*;
pub use server::*;
pub use upload::*;

use std::path::{Path, PathBuf};

use anyhow::Context;
use walkdir::WalkDir;

use crate::config::{DbOptions, Opts};
use crate::store::EmbeddingStore;
use crate::{db, vtable};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 加载向量库：优先本地向量表，否则从数据库读全表
pub(crate) async fn load_store(
    vectors: Option<&Path>,
    db: &DbOptions,
) -> anyhow::Result<EmbeddingStore> {
    let rows = match vectors {
        Some(path) => {
            let mut rows = vec![];
            for file in vector_files(path)? {
                let table = vtable::read(&file)?;
                vtable::validate_rows(&table)?;
                for (i, row) in table.iter().enumerate() {
                    rows.push(row.to_store_row(i + 1)?);
                }
            }
            rows
        }
        None => {
            let url = db
                .database_url
                .as_deref()
                .context("未指定本地向量表时需要 DATABASE_URL 或 --database-url")?;
            let pool = db::init_db(url).await?;
            db::crud::fetch_store_rows(&pool, &db.table).await?
        }
    };
    Ok(EmbeddingStore::load(rows)?)
}

/// 按文件名排序收集向量表文件，保证加载顺序确定
pub(crate) fn vector_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "tsv")
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    Ok(files)
}
