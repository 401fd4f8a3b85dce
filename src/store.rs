use log::info;
use ndarray::{Array1, Array2};
use serde::Serialize;

use crate::error::{Error, Result};

/// 判定单位范数时允许的浮点误差
pub const NORM_TOLERANCE: f32 = 1e-5;

/// 向量库的一行输入，向量尚未归一化
#[derive(Debug, Clone)]
pub struct StoreRow {
    pub file_id: String,
    pub filename: String,
    pub vector: Vec<f32>,
}

/// 单条检索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub file_id: String,
    pub filename: String,
    pub score: f32,
}

/// 内存中的向量库
///
/// 行矩阵与标识符列表按插入顺序一一对应，这个顺序是查询结果回联
/// 标识符的唯一键，加载之后不再重排，也不做原地修改。所有行在加载时
/// 归一化为单位 L2 范数，因此余弦相似度退化为点积。
pub struct EmbeddingStore {
    ids: Vec<String>,
    names: Vec<String>,
    matrix: Array2<f32>,
}

impl EmbeddingStore {
    /// 从有序的 (标识符, 向量) 行构建向量库
    ///
    /// 第一行确定整库维度，后续任何维度不一致的行都会导致整个加载失败；
    /// 零向量同样被拒绝，因为归一化没有定义。
    pub fn load(rows: impl IntoIterator<Item = StoreRow>) -> Result<Self> {
        let mut ids = vec![];
        let mut names = vec![];
        let mut data = vec![];
        let mut dim = 0usize;

        for mut row in rows {
            if ids.is_empty() {
                dim = row.vector.len();
            }
            if row.vector.len() != dim || dim == 0 {
                return Err(Error::DimensionMismatch {
                    id: row.file_id,
                    expected: dim,
                    got: row.vector.len(),
                });
            }
            l2_normalize(&mut row.vector)
                .ok_or_else(|| Error::DegenerateVector { id: row.file_id.clone() })?;

            ids.push(row.file_id);
            names.push(row.filename);
            data.extend_from_slice(&row.vector);
        }

        let matrix =
            Array2::from_shape_vec((ids.len(), dim), data).expect("行数与维度在构建时已保证一致");

        info!("向量库加载完成: {} 行, 维度 {}", ids.len(), dim);

        Ok(Self { ids, names, matrix })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 向量维度
    pub fn dim(&self) -> usize {
        self.matrix.ncols()
    }

    /// 用归一化后的查询向量做 top-k 余弦检索
    ///
    /// 结果按相似度非递增排列；分数相同时按插入顺序排列，保证同样的
    /// 输入总是产生同样的输出。`k` 超过库大小时返回全部行。
    pub fn query(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.is_empty() {
            return Err(Error::EmptyStore);
        }
        if query.len() != self.dim() {
            return Err(Error::DimensionMismatch {
                id: "query".to_string(),
                expected: self.dim(),
                got: query.len(),
            });
        }

        let query = Array1::from_vec(query.to_vec());
        let scores = self.matrix.dot(&query);

        // 稳定排序天然保留相同分数之间的插入顺序
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        order.truncate(k.min(self.len()));

        Ok(order
            .into_iter()
            .map(|i| SearchHit {
                file_id: self.ids[i].clone(),
                filename: self.names[i].clone(),
                score: scores[i],
            })
            .collect())
    }

    #[cfg(test)]
    fn row_norm(&self, i: usize) -> f32 {
        self.matrix.row(i).mapv(|v| v * v).sum().sqrt()
    }
}

/// 原地 L2 归一化，返回原始范数；零向量返回 `None`
pub fn l2_normalize(v: &mut [f32]) -> Option<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_normal() {
        return None;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    Some(norm)
}

/// 归一化查询向量，查询端与库端使用同一套归一化规则
pub fn normalize_query(mut v: Vec<f32>) -> Result<Vec<f32>> {
    l2_normalize(&mut v).ok_or_else(|| Error::DegenerateVector { id: "query".to_string() })?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn row(id: &str, vector: Vec<f32>) -> StoreRow {
        StoreRow { file_id: id.to_string(), filename: format!("{id}.jpg"), vector }
    }

    fn toy_store() -> EmbeddingStore {
        EmbeddingStore::load([
            row("id0", vec![1., 0.]),
            row("id1", vec![0., 1.]),
            row("id2", vec![0.707, 0.707]),
        ])
        .unwrap()
    }

    #[test]
    fn rows_are_unit_normalized_after_load() {
        let store = EmbeddingStore::load([
            row("a", vec![3., 4., 0.]),
            row("b", vec![0.1, 0.1, 0.1]),
            row("c", vec![-5., 2., 8.]),
        ])
        .unwrap();
        for i in 0..store.len() {
            assert!((store.row_norm(i) - 1.).abs() < NORM_TOLERANCE);
        }
    }

    #[test]
    fn query_returns_closest_first() {
        let store = toy_store();
        let result = store.query(&[1., 0.], 2).unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].file_id, "id0");
        assert!((result[0].score - 1.).abs() < 1e-5);
        assert_eq!(result[1].file_id, "id2");
        assert!((result[1].score - 0.707).abs() < 1e-3);
    }

    #[test]
    fn scores_are_non_increasing() {
        let store = toy_store();
        let result = store.query(&normalize_query(vec![0.3, 0.8]).unwrap(), 3).unwrap();
        for pair in result.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn ties_keep_insertion_order() {
        let store = EmbeddingStore::load([
            row("first", vec![0., 1.]),
            row("second", vec![0., 1.]),
            row("third", vec![0., 1.]),
        ])
        .unwrap();
        let result = store.query(&[0., 1.], 3).unwrap();
        let ids: Vec<_> = result.iter().map(|h| h.file_id.as_str()).collect();
        assert_eq!(ids, ["first", "second", "third"]);
    }

    #[rstest]
    #[case(5)]
    #[case(100)]
    fn k_larger_than_store_returns_all(#[case] k: usize) {
        let store = toy_store();
        let result = store.query(&[1., 0.], k).unwrap();
        assert_eq!(result.len(), store.len());
    }

    #[test]
    fn dimension_drift_aborts_load() {
        let rows = (0..10)
            .map(|i| row(&format!("img{i}"), if i == 7 { vec![1.; 3] } else { vec![1.; 4] }));
        match EmbeddingStore::load(rows) {
            Err(Error::DimensionMismatch { id, expected, got }) => {
                assert_eq!(id, "img7");
                assert_eq!(expected, 4);
                assert_eq!(got, 3);
            }
            other => panic!("期望维度错误，实际为 {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn zero_vector_aborts_load() {
        let result = EmbeddingStore::load([row("ok", vec![1., 0.]), row("zero", vec![0., 0.])]);
        assert!(matches!(result, Err(Error::DegenerateVector { id }) if id == "zero"));
    }

    #[test]
    fn query_on_empty_store_fails() {
        let store = EmbeddingStore::load([]).unwrap();
        assert!(matches!(store.query(&[1., 0.], 1), Err(Error::EmptyStore)));
    }

    #[test]
    fn query_dimension_is_checked() {
        let store = toy_store();
        assert!(matches!(store.query(&[1., 0., 0.], 1), Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn normalize_query_rejects_zero_vector() {
        assert!(matches!(normalize_query(vec![0., 0., 0.]), Err(Error::DegenerateVector { .. })));
    }
}
