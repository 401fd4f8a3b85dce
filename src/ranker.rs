use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::info;
use serde::Serialize;

use crate::error::Result;
use crate::store::SearchHit;

/// 带名次的检索结果，名次从 1 开始
#[derive(Debug, Clone, Serialize)]
pub struct RankedHit {
    pub rank: usize,
    pub file_id: String,
    pub filename: String,
    pub score: f32,
}

/// 给向量库的有序结果标上名次
pub fn rank_hits(hits: Vec<SearchHit>) -> Vec<RankedHit> {
    hits.into_iter()
        .enumerate()
        .map(|(i, hit)| RankedHit {
            rank: i + 1,
            file_id: hit.file_id,
            filename: hit.filename,
            score: hit.score,
        })
        .collect()
}

/// 单个查询的名次分析结果
#[derive(Debug, Clone, Serialize)]
pub struct RankAnalysis {
    pub query: String,
    pub expected_id: String,
    /// 期望图片出现的名次，未出现时为 `None`
    pub rank: Option<usize>,
    pub score: Option<f32>,
    pub found_in_top_1: bool,
    pub found_in_top_3: bool,
    pub found_in_top_5: bool,
    pub found_in_top_10: bool,
}

/// 检查期望的图片标识出现在第几名
///
/// 评估只是报表层面的功能，查询路径本身的正确性不依赖它。
pub fn analyze_ranking(query: &str, expected_id: &str, hits: &[RankedHit]) -> RankAnalysis {
    let found = hits
        .iter()
        .find(|hit| hit.file_id.contains(expected_id) || hit.filename.contains(expected_id));

    let rank = found.map(|hit| hit.rank);
    let within = |n| rank.is_some_and(|r| r <= n);

    RankAnalysis {
        query: query.to_string(),
        expected_id: expected_id.to_string(),
        rank,
        score: found.map(|hit| hit.score),
        found_in_top_1: within(1),
        found_in_top_3: within(3),
        found_in_top_5: within(5),
        found_in_top_10: within(10),
    }
}

/// 一组查询的召回率汇总
#[derive(Debug, Default, Serialize)]
pub struct EvalSummary {
    pub total: usize,
    pub top_1: usize,
    pub top_3: usize,
    pub top_5: usize,
    pub top_10: usize,
}

impl EvalSummary {
    pub fn percent(&self, hits: usize) -> f32 {
        if self.total == 0 { 0. } else { hits as f32 * 100. / self.total as f32 }
    }
}

pub fn summarize(analyses: &[RankAnalysis]) -> EvalSummary {
    EvalSummary {
        total: analyses.len(),
        top_1: analyses.iter().filter(|a| a.found_in_top_1).count(),
        top_3: analyses.iter().filter(|a| a.found_in_top_3).count(),
        top_5: analyses.iter().filter(|a| a.found_in_top_5).count(),
        top_10: analyses.iter().filter(|a| a.found_in_top_10).count(),
    }
}

/// 从文件名主干提取期望匹配的标识，取最后一个下划线分段
///
/// 例：`design_crop_1ab2c3.png` -> `1ab2c3`
pub fn expected_id_from_stem(stem: &str) -> &str {
    stem.rsplit('_').next().unwrap_or(stem).trim()
}

/// 将逐查询的评估结果导出为制表符分隔的审计文件
pub fn write_audit(path: &Path, results: &[(RankAnalysis, Vec<RankedHit>)]) -> Result<()> {
    let mut content =
        String::from("query\texpected_id\trank\tscore\ttop_1\ttop_3\ttop_5\ttop_10\tresults\n");
    for (analysis, hits) in results {
        let ranked: Vec<String> =
            hits.iter().map(|h| format!("{}:{:.4}", h.file_id, h.score)).collect();
        let _ = writeln!(
            content,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            analysis.query,
            analysis.expected_id,
            analysis.rank.map_or(String::new(), |r| r.to_string()),
            analysis.score.map_or(String::new(), |s| format!("{s:.4}")),
            analysis.found_in_top_1,
            analysis.found_in_top_3,
            analysis.found_in_top_5,
            analysis.found_in_top_10,
            ranked.join(","),
        );
    }
    fs::write(path, content)?;
    info!("评估结果已导出: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(ids: &[&str]) -> Vec<RankedHit> {
        rank_hits(
            ids.iter()
                .enumerate()
                .map(|(i, id)| SearchHit {
                    file_id: id.to_string(),
                    filename: format!("{id}.jpg"),
                    score: 1. - i as f32 * 0.1,
                })
                .collect(),
        )
    }

    #[test]
    fn ranks_are_one_based_and_ordered() {
        let ranked = hits(&["a", "b", "c"]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[2].rank, 3);
    }

    #[test]
    fn analysis_reports_rank_thresholds() {
        let ranked = hits(&["x", "y", "z", "w", "target"]);
        let analysis = analyze_ranking("q.png", "target", &ranked);

        assert_eq!(analysis.rank, Some(5));
        assert!(!analysis.found_in_top_3);
        assert!(analysis.found_in_top_5);
        assert!(analysis.found_in_top_10);
    }

    #[test]
    fn missing_expected_id_reports_no_rank() {
        let analysis = analyze_ranking("q.png", "nowhere", &hits(&["a", "b"]));
        assert_eq!(analysis.rank, None);
        assert!(!analysis.found_in_top_10);
    }

    #[test]
    fn summary_counts_hits_per_level() {
        let analyses = vec![
            analyze_ranking("q1", "a", &hits(&["a", "b"])),
            analyze_ranking("q2", "b", &hits(&["a", "b"])),
            analyze_ranking("q3", "zzz", &hits(&["a", "b"])),
        ];
        let summary = summarize(&analyses);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.top_1, 1);
        assert_eq!(summary.top_3, 2);
        assert!((summary.percent(summary.top_3) - 66.7).abs() < 0.1);
    }

    #[test]
    fn expected_id_takes_last_stem_token() {
        assert_eq!(expected_id_from_stem("design_crop_1ab2c3"), "1ab2c3");
        assert_eq!(expected_id_from_stem("plain"), "plain");
    }

    #[test]
    fn audit_file_contains_per_query_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.tsv");
        let ranked = hits(&["a", "b"]);
        let analysis = analyze_ranking("q1.png", "a", &ranked);

        write_audit(&path, &[(analysis, ranked)]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("query\t"));
        assert!(content.contains("q1.png\ta\t1\t"));
    }
}
