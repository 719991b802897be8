//! Report-card arithmetic shared by the rapot and leger handlers.
//!
//! Everything here works on plain score vectors so it can be tested without
//! a database.

use crate::grading::{self, NilaiKind};
use serde::Serialize;

/// Per-student totals for one leger row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSummary {
    pub jumlah: Option<f64>,
    pub rata_rata: Option<f64>,
    pub rank: Option<usize>,
}

/// Sums and averages every present score of each row, then ranks rows by
/// average. Rows without any score are unranked.
pub fn summarize_rows(rows: &[Vec<Option<f64>>]) -> Vec<RowSummary> {
    let mut out: Vec<RowSummary> = rows
        .iter()
        .map(|scores| {
            let present: Vec<f64> = scores.iter().flatten().copied().collect();
            let jumlah = if present.is_empty() {
                None
            } else {
                Some(grading::round2(present.iter().sum()))
            };
            RowSummary {
                jumlah,
                rata_rata: grading::average(present),
                rank: None,
            }
        })
        .collect();
    let averages: Vec<Option<f64>> = out.iter().map(|r| r.rata_rata).collect();
    for (row, rank) in out.iter_mut().zip(grading::competition_ranks(&averages)) {
        row.rank = rank;
    }
    out
}

/// Column averages over the students that have a score in that column.
pub fn column_averages(rows: &[Vec<Option<f64>>], columns: usize) -> Vec<Option<f64>> {
    (0..columns)
        .map(|c| grading::average(rows.iter().filter_map(|r| r.get(c).copied().flatten())))
        .collect()
}

/// Average of a sikap group with its predikat and description.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupGrade {
    pub rata_rata: Option<f64>,
    pub predikat: Option<&'static str>,
    pub deskripsi: Option<&'static str>,
}

pub fn group_grade<I>(kind: NilaiKind, values: I) -> GroupGrade
where
    I: IntoIterator<Item = f64>,
{
    let rata_rata = grading::average(values);
    let grade = rata_rata.map(|v| grading::grade(kind, v));
    GroupGrade {
        rata_rata,
        predikat: grade.map(|g| g.predikat),
        deskripsi: grade.map(|g| g.deskripsi),
    }
}

/// Formats a score for CSV output: whole numbers without decimals.
pub fn format_score(v: Option<f64>) -> String {
    match v {
        None => String::new(),
        Some(x) if x.fract() == 0.0 => format!("{}", x as i64),
        Some(x) => {
            let s = format!("{:.2}", grading::round2(x));
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        }
    }
}
