//! # Activity Log Export
//!
//! Renders activity log entries as CSV (RFC 4180 quoting) or as a plain
//! text PDF report. The PDF writer emits a single-font PDF 1.4 document
//! with one content stream per page and a byte-exact cross-reference
//! table; it supports exactly what the report needs.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::state::ActivityLogRecord;

/// Column headers of the CSV export.
pub const CSV_HEADERS: [&str; 7] = [
    "id",
    "created_at",
    "user",
    "action",
    "target_type",
    "target_id",
    "details",
];

/// Entry with the acting user's display name resolved.
#[derive(Debug, Clone)]
pub struct ExportRow<'a> {
    pub entry: &'a ActivityLogRecord,
    pub user: Option<String>,
}

impl ExportRow<'_> {
    fn user_label(&self) -> String {
        match (&self.user, self.entry.user_id) {
            (Some(name), _) => name.clone(),
            (None, Some(id)) => format!("user {id}"),
            (None, None) => "system".to_string(),
        }
    }

    fn target_label(&self) -> String {
        self.entry
            .target_id
            .map(|id| id.to_string())
            .unwrap_or_default()
    }
}

/// Quote a CSV cell. Cells a spreadsheet would evaluate as a formula are
/// prefixed with `'` so they open as text.
fn csv_field(raw: &str) -> String {
    let raw = if raw.starts_with(['=', '+', '-', '@', '\t', '\r']) {
        format!("'{raw}")
    } else {
        raw.to_string()
    };
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

/// Render rows as CSV with a header line. Lines end in CRLF.
pub fn to_csv(rows: &[ExportRow<'_>]) -> String {
    let mut out = CSV_HEADERS.join(",");
    out.push_str("\r\n");
    for row in rows {
        let fields = [
            row.entry.id.to_string(),
            row.entry.created_at.to_rfc3339(),
            row.user_label(),
            row.entry.action.clone(),
            row.entry.target_type.clone(),
            row.target_label(),
            row.entry.details.to_string(),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    }
    out
}

// ---------------------------------------------------------------------------
// PDF
// ---------------------------------------------------------------------------

const LINES_PER_PAGE: usize = 60;
const MAX_LINE_CHARS: usize = 110;
const FONT_SIZE: u32 = 8;
const LEADING: u32 = 11;
const PAGE_WIDTH: u32 = 612;
const PAGE_HEIGHT: u32 = 792;
const MARGIN: u32 = 40;

/// Render rows as a PDF report titled `title`.
pub fn to_pdf(title: &str, generated_at: DateTime<Utc>, rows: &[ExportRow<'_>]) -> Vec<u8> {
    let mut lines = vec![
        title.to_string(),
        format!(
            "Generated {} - {} entries",
            generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            rows.len()
        ),
        String::new(),
    ];
    for row in rows {
        let line = format!(
            "#{} {} {} {} {} {} {}",
            row.entry.id,
            row.entry.created_at.format("%Y-%m-%d %H:%M"),
            row.user_label(),
            row.entry.action,
            row.entry.target_type,
            row.target_label(),
            row.entry.details
        );
        lines.push(truncate(&line, MAX_LINE_CHARS));
    }

    let pages: Vec<&[String]> = lines.chunks(LINES_PER_PAGE).collect();
    PdfWriter::default().finish(&pages)
}

fn truncate(line: &str, max: usize) -> String {
    if line.chars().count() <= max {
        return line.to_string();
    }
    let mut out: String = line.chars().take(max - 3).collect();
    out.push_str("...");
    out
}

/// Escape a line for a PDF literal string; non-ASCII becomes `?`.
fn pdf_text(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for c in line.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

#[derive(Default)]
struct PdfWriter {
    buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl PdfWriter {
    fn object(&mut self, body: &str) {
        self.offsets.push(self.buf.len());
        let number = self.offsets.len();
        self.buf
            .extend_from_slice(format!("{number} 0 obj\n{body}\nendobj\n").as_bytes());
    }

    fn finish(mut self, pages: &[&[String]]) -> Vec<u8> {
        self.buf.extend_from_slice(b"%PDF-1.4\n");

        // Objects: 1 catalog, 2 page tree, 3 font, then (page, content) pairs.
        let page_count = pages.len().max(1);
        let page_ids: Vec<usize> = (0..page_count).map(|i| 4 + i * 2).collect();
        let kids: Vec<String> = page_ids.iter().map(|id| format!("{id} 0 R")).collect();

        self.object("<< /Type /Catalog /Pages 2 0 R >>");
        self.object(&format!(
            "<< /Type /Pages /Kids [{}] /Count {page_count} >>",
            kids.join(" ")
        ));
        self.object("<< /Type /Font /Subtype /Type1 /BaseFont /Courier >>");

        let empty: &[String] = &[];
        for i in 0..page_count {
            let lines = pages.get(i).copied().unwrap_or(empty);
            let mut stream = format!(
                "BT /F1 {FONT_SIZE} Tf {LEADING} TL {MARGIN} {} Td",
                PAGE_HEIGHT - MARGIN
            );
            for line in lines {
                let _ = write!(stream, " ({}) Tj T*", pdf_text(line));
            }
            stream.push_str(" ET");

            self.object(&format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                page_ids[i] + 1
            ));
            self.object(&format!(
                "<< /Length {} >>\nstream\n{stream}\nendstream",
                stream.len()
            ));
        }

        let xref_offset = self.buf.len();
        let mut xref = format!("xref\n0 {}\n0000000000 65535 f \n", self.offsets.len() + 1);
        for offset in &self.offsets {
            let _ = write!(xref, "{offset:010} 00000 n \n");
        }
        let _ = write!(
            xref,
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            self.offsets.len() + 1
        );
        self.buf.extend_from_slice(xref.as_bytes());
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(id: i64, details: serde_json::Value) -> ActivityLogRecord {
        ActivityLogRecord {
            id,
            user_id: Some(7),
            action: "created".into(),
            target_type: "outlet".into(),
            target_id: Some(3),
            details,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn csv_quotes_fields_with_commas_and_quotes() {
        let e = entry(1, json!({"name": "Harbour, \"East\""}));
        let rows = [ExportRow {
            entry: &e,
            user: Some("Aisha".into()),
        }];
        let csv = to_csv(&rows);
        let mut lines = csv.split("\r\n");
        assert_eq!(lines.next().unwrap(), CSV_HEADERS.join(","));
        let data = lines.next().unwrap();
        assert!(data.starts_with("1,"));
        assert!(data.contains(",Aisha,created,outlet,3,"));
        assert!(data.ends_with(r#""{""name"":""Harbour, \""East\""""}""#));
    }

    #[test]
    fn csv_neutralizes_formula_cells() {
        let e = entry(3, json!({}));
        let rows = [
            ExportRow {
                entry: &e,
                user: Some("=HYPERLINK(\"http://x\")".into()),
            },
            ExportRow {
                entry: &e,
                user: Some("@SUM(A1:A9)".into()),
            },
            ExportRow {
                entry: &e,
                user: Some("-2+3".into()),
            },
        ];
        let csv = to_csv(&rows);
        let lines: Vec<&str> = csv.split("\r\n").skip(1).collect();
        assert!(lines[0].contains(r#","'=HYPERLINK(""http://x"")","#));
        assert!(lines[1].contains(",'@SUM(A1:A9),"));
        assert!(lines[2].contains(",'-2+3,"));
        assert_eq!(csv_field("Aisha"), "Aisha");
        assert_eq!(csv_field("{}"), "{}");
    }

    #[test]
    fn csv_labels_system_entries() {
        let mut e = entry(2, json!({}));
        e.user_id = None;
        let rows = [ExportRow { entry: &e, user: None }];
        assert!(to_csv(&rows).contains(",system,"));
    }

    #[test]
    fn pdf_has_header_trailer_and_valid_xref() {
        let entries: Vec<ActivityLogRecord> = (1..=130).map(|i| entry(i, json!({}))).collect();
        let rows: Vec<ExportRow<'_>> = entries
            .iter()
            .map(|e| ExportRow { entry: e, user: None })
            .collect();
        let pdf = to_pdf("Activity Log", Utc::now(), &rows);
        let text = String::from_utf8(pdf.clone()).unwrap();

        assert!(text.starts_with("%PDF-1.4\n"));
        assert!(text.ends_with("%%EOF\n"));
        // 133 lines -> 3 pages.
        assert!(text.contains("/Count 3"));

        let start = text.rfind("startxref\n").unwrap() + "startxref\n".len();
        let offset: usize = text[start..].lines().next().unwrap().parse().unwrap();
        assert!(text[offset..].starts_with("xref\n"));

        let first_obj = text.find("1 0 obj").unwrap();
        assert!(text.contains(&format!("{first_obj:010} 00000 n ")));
    }

    #[test]
    fn pdf_escapes_parentheses_and_non_ascii() {
        assert_eq!(pdf_text("a(b)c\\"), "a\\(b\\)c\\\\");
        assert_eq!(pdf_text("café"), "caf?");
    }

    #[test]
    fn empty_export_still_has_a_page() {
        let pdf = to_pdf("Activity Log", Utc::now(), &[]);
        let text = String::from_utf8(pdf).unwrap();
        assert!(text.contains("/Count 1"));
    }
}
