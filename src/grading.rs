use serde::Serialize;
use std::cmp::Ordering;

/// Which threshold table a numeric score is graded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NilaiKind {
    Ujian,
    Hafalan,
    Sikap,
}

impl NilaiKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NilaiKind::Ujian => "ujian",
            NilaiKind::Hafalan => "hafalan",
            NilaiKind::Sikap => "sikap",
        }
    }
}

/// Mapel are graded either as exams or as memorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kategori {
    Ujian,
    Hafalan,
}

impl Kategori {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ujian" => Some(Kategori::Ujian),
            "hafalan" => Some(Kategori::Hafalan),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Kategori::Ujian => "ujian",
            Kategori::Hafalan => "hafalan",
        }
    }

    pub fn nilai_kind(self) -> NilaiKind {
        match self {
            Kategori::Ujian => NilaiKind::Ujian,
            Kategori::Hafalan => NilaiKind::Hafalan,
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Kategori::Ujian => "nilai_ujian",
            Kategori::Hafalan => "nilai_hafalan",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Threshold {
    pub min: f64,
    pub predikat: &'static str,
    pub deskripsi: &'static str,
}

// Ordered from the highest lower bound down; the last row always has min 0.
const UJIAN: &[Threshold] = &[
    Threshold { min: 90.0, predikat: "A", deskripsi: "Istimewa" },
    Threshold { min: 80.0, predikat: "B", deskripsi: "Baik Sekali" },
    Threshold { min: 70.0, predikat: "C", deskripsi: "Baik" },
    Threshold { min: 60.0, predikat: "D", deskripsi: "Cukup" },
    Threshold { min: 0.0, predikat: "E", deskripsi: "Kurang" },
];

const HAFALAN: &[Threshold] = &[
    Threshold { min: 90.0, predikat: "A", deskripsi: "Mumtaz" },
    Threshold { min: 80.0, predikat: "B", deskripsi: "Jayyid Jiddan" },
    Threshold { min: 70.0, predikat: "C", deskripsi: "Jayyid" },
    Threshold { min: 0.0, predikat: "D", deskripsi: "Maqbul" },
];

const SIKAP: &[Threshold] = &[
    Threshold { min: 90.0, predikat: "A", deskripsi: "Sangat Baik" },
    Threshold { min: 80.0, predikat: "B", deskripsi: "Baik" },
    Threshold { min: 70.0, predikat: "C", deskripsi: "Cukup" },
    Threshold { min: 0.0, predikat: "D", deskripsi: "Kurang" },
];

pub fn thresholds(kind: NilaiKind) -> &'static [Threshold] {
    match kind {
        NilaiKind::Ujian => UJIAN,
        NilaiKind::Hafalan => HAFALAN,
        NilaiKind::Sikap => SIKAP,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum NilaiError {
    #[error("nilai must be a finite number")]
    NotFinite,
    #[error("nilai must be between 0 and 100 (got {0})")]
    OutOfRange(f64),
}

pub fn validate_nilai(v: f64) -> Result<f64, NilaiError> {
    if !v.is_finite() {
        return Err(NilaiError::NotFinite);
    }
    if !(0.0..=100.0).contains(&v) {
        return Err(NilaiError::OutOfRange(v));
    }
    Ok(v)
}

/// Maps a validated 0..=100 score to its threshold row.
pub fn grade(kind: NilaiKind, nilai: f64) -> &'static Threshold {
    let table = thresholds(kind);
    table
        .iter()
        .find(|t| nilai >= t.min)
        .unwrap_or(&table[table.len() - 1])
}

pub fn predikat(kind: NilaiKind, nilai: f64) -> &'static str {
    grade(kind, nilai).predikat
}

pub fn deskripsi(kind: NilaiKind, nilai: f64) -> &'static str {
    grade(kind, nilai).deskripsi
}

/// Half-up rounding to two decimals; scores are never negative.
/// The epsilon lifts decimal halves such as 1.005, stored just below, back onto the half.
pub fn round2(x: f64) -> f64 {
    ((100.0 * x) + 0.5 + 1e-9).floor() / 100.0
}

pub fn average<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0;
    let mut n = 0usize;
    for v in values {
        sum += v;
        n += 1;
    }
    if n == 0 {
        None
    } else {
        Some(round2(sum / n as f64))
    }
}

/// Competition ranking ("1224") over the rounded scores, highest first.
/// Entries without a score are left unranked.
pub fn competition_ranks(scores: &[Option<f64>]) -> Vec<Option<usize>> {
    let mut order: Vec<(usize, f64)> = scores
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.map(|v| (i, round2(v))))
        .collect();
    order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let mut out = vec![None; scores.len()];
    let mut prev: Option<f64> = None;
    let mut prev_rank = 0usize;
    for (pos, (idx, v)) in order.into_iter().enumerate() {
        let rank = match prev {
            Some(p) if p == v => prev_rank,
            _ => pos + 1,
        };
        out[idx] = Some(rank);
        prev = Some(v);
        prev_rank = rank;
    }
    out
}
