use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{DbOptions, Opts};
use crate::{db, vtable};

#[derive(Parser, Debug, Clone)]
pub struct UploadCommand {
    #[command(flatten)]
    pub db: DbOptions,
    /// 向量表文件或目录
    pub path: PathBuf,
    /// 全量重扫模式：采集端重新扫描了全部图片，旧向量作废，上传前重建表
    #[arg(long)]
    pub full_rescan: bool,
}

impl SubCommandExtend for UploadCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let files = super::vector_files(&self.path)?;
        anyhow::ensure!(!files.is_empty(), "没有找到向量表文件");

        let url =
            self.db.database_url.as_deref().context("需要 DATABASE_URL 或 --database-url")?;
        let pool = db::init_db(url).await?;

        // 用第一个向量确定整表维度
        let first = vtable::read(&files[0])?;
        let dim = first
            .first()
            .and_then(|row| vtable::parse_vector(&row.embedding))
            .map(|v| v.len())
            .context("第一个向量表为空或向量非法")?;
        db::crud::ensure_schema(&pool, &self.db.table, dim, self.full_rescan).await?;

        let mut total = 0;
        for file in &files {
            let rows = vtable::read(file)?;
            total += db::crud::upsert_rows(&pool, &self.db.table, &rows).await?;
            info!("[OK] {}: {} 行", file.display(), rows.len());
        }

        // 上传后核对行数，及早发现合并丢行
        let count = db::crud::count_rows(&pool, &self.db.table).await?;
        println!("上传完成：本次 {} 行，表 {} 中共 {} 行", total, self.db.table, count);
        Ok(())
    }
}
