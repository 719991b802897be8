use anyhow::{anyhow, Context};
use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;

/// A header-keyed table read from an xlsx/xls workbook or a CSV file.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<SheetRow>,
}

#[derive(Debug, Clone)]
pub struct SheetRow {
    /// 1-based line number in the source, header included.
    pub line: usize,
    pub cells: Vec<String>,
}

impl Sheet {
    /// Finds the first column whose header matches one of the aliases,
    /// ignoring case, surrounding spaces, and `_`/`.` separators.
    pub fn column(&self, aliases: &[&str]) -> Option<usize> {
        let wanted: Vec<String> = aliases.iter().map(|a| normalize_header(a)).collect();
        self.headers
            .iter()
            .position(|h| wanted.contains(&normalize_header(h)))
    }
}

impl SheetRow {
    pub fn get(&self, col: Option<usize>) -> Option<&str> {
        let c = col?;
        let v = self.cells.get(c)?.trim();
        if v.is_empty() {
            None
        } else {
            Some(v)
        }
    }
}

fn normalize_header(s: &str) -> String {
    s.trim()
        .to_ascii_lowercase()
        .replace(['_', '.'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn read_sheet(path: &Path) -> anyhow::Result<Sheet> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" | "txt" => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
            Ok(parse_csv_text(&text))
        }
        "xlsx" | "xlsm" | "xls" | "ods" => read_workbook(path),
        other => Err(anyhow!("unsupported spreadsheet extension: {:?}", other)),
    }
}

fn read_workbook(path: &Path) -> anyhow::Result<Sheet> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("failed to open workbook {}", path.to_string_lossy()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("workbook has no sheets"))?
        .context("failed to read first sheet")?;

    let mut sheet = Sheet::default();
    let first_row = range.start().map(|(r, _)| r as usize).unwrap_or(0);
    for (i, row) in range.rows().enumerate() {
        let cells: Vec<String> = row.iter().map(cell_to_string).collect();
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let line = first_row + i + 1;
        if sheet.headers.is_empty() {
            sheet.headers = cells;
        } else {
            sheet.rows.push(SheetRow { line, cells });
        }
    }
    Ok(sheet)
}

fn cell_to_string(d: &Data) -> String {
    match d {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        // NIS columns are commonly typed as numbers; keep them integral.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        Data::DateTimeIso(s) => s.chars().take(10).collect(),
        Data::DurationIso(s) => s.clone(),
    }
}

pub fn parse_csv_text(text: &str) -> Sheet {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut sheet = Sheet::default();
    for (line, record) in csv_records(text) {
        let cells = parse_csv_record(&record);
        if sheet.headers.is_empty() {
            sheet.headers = cells;
        } else {
            sheet.rows.push(SheetRow { line, cells });
        }
    }
    sheet
}

/// Joins physical lines into logical records: a line break inside a quoted
/// field belongs to the field. Each record carries the 1-based line it starts on.
fn csv_records(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (i, line) in text.lines().enumerate() {
        let (start, mut record) = match pending.take() {
            Some((start, mut open)) => {
                open.push('\n');
                (start, open)
            }
            None if line.trim().is_empty() => continue,
            None => (i + 1, String::new()),
        };
        record.push_str(line);
        // An odd quote count means a quoted field is still open; `""` escapes pair up.
        if record.matches('"').count() % 2 == 1 {
            pending = Some((start, record));
        } else {
            out.push((start, record));
        }
    }
    // An unterminated quote swallows the rest of the file as one record.
    out.extend(pending);
    out
}

pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if ch == ',' && !in_quotes {
            out.push(buf);
            buf = String::new();
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    out.push(buf);
    out
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn write_csv(path: &Path, header: &[&str], rows: &[Vec<String>]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
    }
    let mut csv = header
        .iter()
        .map(|h| csv_quote(h))
        .collect::<Vec<_>>()
        .join(",");
    csv.push('\n');
    for row in rows {
        csv.push_str(
            &row.iter()
                .map(|c| csv_quote(c))
                .collect::<Vec<_>>()
                .join(","),
        );
        csv.push('\n');
    }
    std::fs::write(path, csv)
        .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;
    Ok(())
}
