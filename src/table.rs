//! Table export extraction.
//!
//! Each table in an export is an HTML page holding a heading, a short
//! description paragraph, and the table itself. The retrievable text keeps
//! the heading and description and flattens the cell text, dropping purely
//! numeric fragments so that embeddings key on labels rather than figures.
//! The raw `<table>` markup is kept alongside for generation.

use scraper::{ElementRef, Html, Selector};

/// Extracted content of one table export.
#[derive(Debug, Clone, PartialEq)]
pub struct TableExtract {
    pub title: String,
    pub description: String,
    /// Flattened, non-numeric cell text.
    pub cells: String,
    /// Outer HTML of the first `<table>`.
    pub table_html: String,
}

impl TableExtract {
    /// Text used for the table node.
    pub fn node_text(&self) -> String {
        format!("{}\n{}\n{}", self.title, self.description, self.cells)
    }
}

/// Parse a table export. Errors when the page holds no `<table>`.
pub fn extract_table(html: &str) -> Result<TableExtract, String> {
    let document = Html::parse_document(html);

    let h1 = selector("h1")?;
    let p = selector("p")?;
    let table = selector("table")?;
    let tr = selector("tr")?;
    let td = selector("td")?;

    let title = document
        .select(&h1)
        .next()
        .map(first_text)
        .unwrap_or_default();
    let description = document
        .select(&p)
        .next()
        .map(first_text)
        .unwrap_or_default();

    let first_table = document
        .select(&table)
        .next()
        .ok_or_else(|| "no <table> element".to_string())?;

    let mut cells = String::new();
    for row in first_table.select(&tr) {
        for cell in row.select(&td) {
            for fragment in cell.text().map(str::trim) {
                if fragment.is_empty() || is_number(fragment) {
                    continue;
                }
                cells.push_str(fragment);
            }
        }
    }

    Ok(TableExtract {
        title,
        description,
        cells: cells.replace("  ", " "),
        table_html: first_table.html(),
    })
}

fn selector(css: &str) -> Result<Selector, String> {
    Selector::parse(css).map_err(|e| format!("invalid selector {}: {}", css, e))
}

/// First direct text fragment of an element, like an XPath `text()[1]`.
fn first_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .next()
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Matches `-?\d+(\.\d+)?`.
fn is_number(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    all_digits(int_part) && frac_part.map(all_digits).unwrap_or(true)
}
