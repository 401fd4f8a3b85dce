use std::fs;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use predicates::prelude::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

const HEADER: &str = "file_id\tfilename\tfile_extension\tfolder_name\tfolder_url\t\
                      direct_url\tdownload_url\tfile_size\tembedding\tmodified_date\t\
                      collection_timestamp";

#[test]
fn help_lists_subcommands() -> Result<()> {
    cargo_run!("imembed", "--help")
        .success()
        .stdout(predicate::str::contains("embed"))
        .stdout(predicate::str::contains("upload"))
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("eval"))
        .stdout(predicate::str::contains("server"));
    Ok(())
}

#[test]
fn embed_without_images_fails() -> Result<()> {
    let dir = assert_fs::TempDir::new()?;

    cargo_run!("imembed", "-c", dir.path(), "embed", dir.path())
        .failure()
        .stderr(predicate::str::contains("没有找到任何图片"));
    Ok(())
}

#[test]
fn search_requires_model_file() -> Result<()> {
    let dir = assert_fs::TempDir::new()?;
    let vectors = dir.path().join("vectors.tsv");
    fs::write(&vectors, format!("{HEADER}\na\ta.png\tpng\t\t\t\t\t\t[1, 0]\t\t\n"))?;
    let query = dir.path().join("query.png");
    fs::write(&query, b"placeholder")?;

    cargo_run!("imembed", "-c", dir.path(), "search", "--vectors", &vectors, &query)
        .failure()
        .stderr(predicate::str::contains("模型文件不存在"));
    Ok(())
}

#[test]
fn search_rejects_malformed_vector_table() -> Result<()> {
    let dir = assert_fs::TempDir::new()?;
    let vectors = dir.path().join("vectors.tsv");
    fs::write(&vectors, format!("{HEADER}\na\ta.png\tpng\t\t\t\t\t\t[1, 0\t\t\n"))?;
    let query = dir.path().join("query.png");
    fs::write(&query, b"placeholder")?;

    cargo_run!("imembed", "-c", dir.path(), "search", "--vectors", &vectors, &query)
        .failure()
        .stderr(predicate::str::contains("表结构校验失败"));
    Ok(())
}

#[test]
fn upload_requires_database_url() -> Result<()> {
    let dir = assert_fs::TempDir::new()?;
    let vectors = dir.path().join("vectors.tsv");
    fs::write(&vectors, format!("{HEADER}\na\ta.png\tpng\t\t\t\t\t\t[1, 0]\t\t\n"))?;

    let mut cmd = Command::cargo_bin("imembed")?;
    cmd.env_remove("DATABASE_URL");
    cmd.args(["-c"]).arg(dir.path()).arg("upload").arg(&vectors);
    cmd.assert().failure().stderr(predicate::str::contains("DATABASE_URL"));
    Ok(())
}
