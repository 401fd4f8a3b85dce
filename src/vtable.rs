use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::store::StoreRow;

/// 向量表的列，与数据库表结构一一对应
pub const COLUMNS: [&str; 11] = [
    "file_id",
    "filename",
    "file_extension",
    "folder_name",
    "folder_url",
    "direct_url",
    "download_url",
    "file_size",
    "embedding",
    "modified_date",
    "collection_timestamp",
];

/// 方括号数值序列的语法校验，例如 `[0.0123, -0.451, 1e-3]`
static VECTOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[([-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?,\s*)*[-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?\]$",
    )
    .expect("failed to build regex")
});

/// 向量表的一行
///
/// 除向量列以外全部按文本保存，与采集端的元数据表保持同构；
/// 向量列是方括号格式的字符串，入库前只做语法级校验，不解析数值。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorRow {
    pub file_id: String,
    pub filename: String,
    pub file_extension: String,
    pub folder_name: String,
    pub folder_url: String,
    pub direct_url: String,
    pub download_url: String,
    pub file_size: String,
    pub embedding: String,
    pub modified_date: String,
    pub collection_timestamp: String,
}

impl VectorRow {
    fn fields(&self) -> [&str; 11] {
        [
            &self.file_id,
            &self.filename,
            &self.file_extension,
            &self.folder_name,
            &self.folder_url,
            &self.direct_url,
            &self.download_url,
            &self.file_size,
            &self.embedding,
            &self.modified_date,
            &self.collection_timestamp,
        ]
    }

    fn from_fields(fields: &[&str]) -> Self {
        Self {
            file_id: fields[0].to_string(),
            filename: fields[1].to_string(),
            file_extension: fields[2].to_string(),
            folder_name: fields[3].to_string(),
            folder_url: fields[4].to_string(),
            direct_url: fields[5].to_string(),
            download_url: fields[6].to_string(),
            file_size: fields[7].to_string(),
            embedding: fields[8].to_string(),
            modified_date: fields[9].to_string(),
            collection_timestamp: fields[10].to_string(),
        }
    }

    /// 解析向量列，转为可加载进向量库的行
    pub fn to_store_row(&self, row: usize) -> Result<StoreRow> {
        let vector = parse_vector(&self.embedding).ok_or_else(|| Error::SchemaValidation {
            row,
            id: self.file_id.clone(),
            reason: format!("向量格式无效: {}", truncated(&self.embedding)),
        })?;
        Ok(StoreRow { file_id: self.file_id.clone(), filename: self.filename.clone(), vector })
    }
}

/// 入库前的整批校验，遇到第一个违例行即拒绝整批
pub fn validate_rows(rows: &[VectorRow]) -> Result<()> {
    for (i, row) in rows.iter().enumerate() {
        let row_no = i + 1;
        if row.file_id.trim().is_empty() {
            return Err(Error::SchemaValidation {
                row: row_no,
                id: row.filename.clone(),
                reason: "file_id 为空".to_string(),
            });
        }
        if !VECTOR_RE.is_match(row.embedding.trim()) {
            return Err(Error::SchemaValidation {
                row: row_no,
                id: row.file_id.clone(),
                reason: format!("向量格式无效: {}", truncated(&row.embedding)),
            });
        }
    }
    Ok(())
}

/// 读取一个向量表文件，校验表头与字段数
pub fn read(path: &Path) -> Result<Vec<VectorRow>> {
    let content = fs::read_to_string(path)?;
    let mut lines = content.lines();

    let header: Vec<&str> = lines.next().unwrap_or("").split('\t').collect();
    if header != COLUMNS {
        return Err(Error::SchemaValidation {
            row: 0,
            id: path.display().to_string(),
            reason: format!("表头 {:?} 与期望的列不一致", header),
        });
    }

    let mut rows = vec![];
    for (i, line) in lines.enumerate() {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != COLUMNS.len() {
            return Err(Error::SchemaValidation {
                row: i + 1,
                id: path.display().to_string(),
                reason: format!("期望 {} 列，实际 {} 列", COLUMNS.len(), fields.len()),
            });
        }
        rows.push(VectorRow::from_fields(&fields));
    }
    Ok(rows)
}

/// 写出一个向量表文件，并记录内容哈希到旁路文件
pub fn write(path: &Path, rows: &[VectorRow]) -> Result<()> {
    let mut content = COLUMNS.join("\t");
    content.push('\n');
    for row in rows {
        content.push_str(&row.fields().join("\t"));
        content.push('\n');
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &content)?;
    fs::write(sidecar_path(path), blake3::hash(content.as_bytes()).to_hex().as_str())?;
    Ok(())
}

/// 内容哈希旁路文件的路径
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".blake3");
    PathBuf::from(s)
}

/// 检查向量表是否存在且内容哈希与旁路记录一致
///
/// 幂等检查的依据：哈希一致说明该批次已经完整产出过，可以直接跳过。
pub fn verify(path: &Path) -> bool {
    let Ok(content) = fs::read(path) else {
        return false;
    };
    let Ok(recorded) = fs::read_to_string(sidecar_path(path)) else {
        return false;
    };
    blake3::hash(&content).to_hex().as_str() == recorded.trim()
}

/// 序列化向量为方括号格式
pub fn format_vector(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(", "))
}

/// 解析方括号格式的向量，格式非法时返回 `None`
pub fn parse_vector(s: &str) -> Option<Vec<f32>> {
    let s = s.trim();
    if !VECTOR_RE.is_match(s) {
        return None;
    }
    s[1..s.len() - 1].split(',').map(|p| p.trim().parse::<f32>().ok()).collect()
}

/// 截断到 40 字节以内，只在字符边界上切
fn truncated(s: &str) -> &str {
    if s.len() <= 40 {
        return s;
    }
    let mut end = 40;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(id: &str, vector: &[f32]) -> VectorRow {
        VectorRow {
            file_id: id.to_string(),
            filename: format!("{id}.png"),
            file_extension: "png".to_string(),
            embedding: format_vector(vector),
            ..Default::default()
        }
    }

    #[test]
    fn vector_round_trip() {
        let vector = vec![0.0123, -0.451, 1.5e-3, 2.];
        assert_eq!(parse_vector(&format_vector(&vector)).unwrap(), vector);
    }

    #[test]
    fn unterminated_vector_rejects_whole_batch() {
        let mut rows = vec![sample_row("a", &[1., 2.]), sample_row("b", &[3., 4.])];
        rows[1].embedding = "[1,2".to_string();

        match validate_rows(&rows) {
            Err(Error::SchemaValidation { row, id, .. }) => {
                assert_eq!(row, 2);
                assert_eq!(id, "b");
            }
            other => panic!("期望校验失败，实际为 {other:?}"),
        }
    }

    #[test]
    fn multibyte_text_in_bad_vector_is_reported_not_panicked() {
        // 错误信息截断不能切在多字节字符中间
        let mut rows = vec![sample_row("a", &[1.])];
        rows[0].embedding = format!("{}中文", "x".repeat(39));

        match validate_rows(&rows) {
            Err(Error::SchemaValidation { row, id, reason }) => {
                assert_eq!(row, 1);
                assert_eq!(id, "a");
                assert!(reason.contains("向量格式无效"));
            }
            other => panic!("期望校验失败，实际为 {other:?}"),
        }
    }

    #[test]
    fn empty_file_id_is_rejected() {
        let rows = vec![sample_row("", &[1.])];
        assert!(matches!(validate_rows(&rows), Err(Error::SchemaValidation { row: 1, .. })));
    }

    #[test]
    fn file_round_trip_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch_0001.tsv");
        let rows = vec![sample_row("a", &[1., 0.]), sample_row("b", &[0.5, 0.5])];

        write(&path, &rows).unwrap();
        assert!(verify(&path));
        assert_eq!(read(&path).unwrap(), rows);

        // 内容被篡改后哈希校验失败
        std::fs::write(&path, "file_id\tgarbage").unwrap();
        assert!(!verify(&path));
    }

    #[test]
    fn bad_header_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        std::fs::write(&path, "id\tvector\nx\t[1]\n").unwrap();
        assert!(matches!(read(&path), Err(Error::SchemaValidation { row: 0, .. })));
    }

    #[test]
    fn store_row_conversion_parses_vector() {
        let row = sample_row("a", &[0.6, 0.8]);
        let store_row = row.to_store_row(1).unwrap();
        assert_eq!(store_row.vector, vec![0.6, 0.8]);

        let mut bad = sample_row("a", &[1.]);
        bad.embedding = "[abc]".to_string();
        assert!(bad.to_store_row(1).is_err());
    }
}
