use log::info;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub mod crud;

pub type Database = PgPool;

pub async fn init_db(url: &str) -> Result<Database, sqlx::Error> {
    info!("初始化数据库连接池");

    let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;

    Ok(pool)
}
