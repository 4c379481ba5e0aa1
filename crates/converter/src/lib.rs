use std::collections::HashMap;

use shared::domain::FieldKey;
use shared::protocol::{ColumnMapping, SierraRecord, SIERRA_COLUMNS};
use thiserror::Error;

/// Sierra rejects imports above this row count, so output is chunked.
pub const SIERRA_MAX_ROWS: usize = 5000;

const SUMMARY_MAX_CHARS: usize = 128;
const SUMMARY_PLACEHOLDER: &str = "...";

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to parse CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV has no header row")]
    MissingHeader,
}

/// One raw FUB row, keyed by source column name.
#[derive(Debug, Clone, Default)]
pub struct SourceRow {
    values: HashMap<String, String>,
}

impl SourceRow {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            values: pairs.into_iter().collect(),
        }
    }

    pub fn column(&self, name: &str) -> &str {
        self.values.get(name).map(String::as_str).unwrap_or("")
    }

    /// Trimmed value of the source column mapped onto `key`; empty when the
    /// key is unmapped or the column is absent.
    pub fn mapped(&self, mapping: &ColumnMapping, key: FieldKey) -> &str {
        mapping
            .source_column(key)
            .map(|column| self.column(column).trim())
            .unwrap_or("")
    }
}

pub struct Conversion {
    pub rows: Vec<SierraRecord>,
    /// Per-row narrative lines, e.g. `Row 3: Jane Doe - jane@example.com`.
    pub row_logs: Vec<String>,
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes)
}

fn source_reader(bytes: &[u8]) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(strip_bom(bytes))
}

/// Column names from the header row of a FUB export.
pub fn detect_columns(bytes: &[u8]) -> Result<Vec<String>, ConvertError> {
    let mut reader = source_reader(bytes);
    let headers = reader.headers()?;
    if headers.is_empty() {
        return Err(ConvertError::MissingHeader);
    }
    Ok(headers.iter().map(str::to_string).collect())
}

pub fn read_source_rows(bytes: &[u8]) -> Result<Vec<SourceRow>, ConvertError> {
    let mut reader = source_reader(bytes);
    let headers: Vec<String> = {
        let headers = reader.headers()?;
        if headers.is_empty() {
            return Err(ConvertError::MissingHeader);
        }
        headers.iter().map(str::to_string).collect()
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(SourceRow::from_pairs(
            headers
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), record.get(i).unwrap_or("").to_string())),
        ));
    }
    Ok(rows)
}

/// Format as `(XXX) XXX-XXXX` when the digits make a US number, otherwise
/// return the trimmed input unchanged.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    let area = match (digits.len(), digits.as_bytes().first().copied()) {
        (10, _) => &digits[..],
        (11, Some(b'1')) => &digits[1..],
        _ => return raw.trim().to_string(),
    };
    format!("({}) {}-{}", &area[0..3], &area[3..6], &area[6..10])
}

/// Split on `;`/`,`/`|`, trim, dedupe preserving first-seen order, rejoin
/// with `"; "`.
pub fn normalize_tags(raw: &str) -> String {
    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::new();
    for tag in raw.split([';', ',', '|']) {
        let tag = tag.trim();
        if !tag.is_empty() && seen.insert(tag) {
            unique.push(tag);
        }
    }
    unique.join("; ")
}

/// Collapse whitespace and truncate at a word boundary so the result,
/// placeholder included, never exceeds `width` characters.
fn shorten(text: &str, width: usize, placeholder: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let placeholder_len = placeholder.chars().count();
    let mut kept = String::new();
    let mut kept_len = 0;
    for word in collapsed.split(' ') {
        let word_len = word.chars().count();
        let candidate = if kept.is_empty() {
            word_len
        } else {
            kept_len + 1 + word_len
        };
        if candidate + placeholder_len > width {
            break;
        }
        if !kept.is_empty() {
            kept.push(' ');
            kept_len += 1;
        }
        kept.push_str(word);
        kept_len += word_len;
    }
    kept.push_str(placeholder);
    kept
}

fn build_short_summary(row: &SourceRow, mapping: &ColumnMapping) -> String {
    let source = row.mapped(mapping, FieldKey::Source);
    let city = row.mapped(mapping, FieldKey::City);
    let state = row.mapped(mapping, FieldKey::State);

    let mut parts = Vec::new();
    if !source.is_empty() {
        parts.push(format!("Source: {source}"));
    }
    if !city.is_empty() || !state.is_empty() {
        let location = [city, state]
            .iter()
            .filter(|part| !part.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        parts.push(format!("Location: {location}"));
    }

    shorten(&parts.join(" | "), SUMMARY_MAX_CHARS, SUMMARY_PLACEHOLDER)
}

fn build_import_note(row: &SourceRow, mapping: &ColumnMapping) -> String {
    let criteria = row.mapped(mapping, FieldKey::SearchCriteria);
    let notes = row.mapped(mapping, FieldKey::Notes);

    let mut parts = Vec::new();
    if !criteria.is_empty() {
        parts.push(format!("Search Criteria: {criteria}"));
    }
    if !notes.is_empty() {
        parts.push(format!("Notes: {notes}"));
    }
    parts.join("\n\n")
}

pub fn convert_row(row: &SourceRow, mapping: &ColumnMapping) -> SierraRecord {
    let first = row.mapped(mapping, FieldKey::FirstName);
    let last = row.mapped(mapping, FieldKey::LastName);
    let full_name = [first, last]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    SierraRecord {
        first_name: first.to_string(),
        last_name: last.to_string(),
        full_name,
        email: row.mapped(mapping, FieldKey::Email).to_string(),
        secondary_email: row.mapped(mapping, FieldKey::SecondaryEmail).to_string(),
        phone: normalize_phone(row.mapped(mapping, FieldKey::Phone)),
        secondary_phone: normalize_phone(row.mapped(mapping, FieldKey::SecondaryPhone)),
        lead_source: row.mapped(mapping, FieldKey::Source).to_string(),
        assigned_agent: row.mapped(mapping, FieldKey::AssignedTo).to_string(),
        street_address: row.mapped(mapping, FieldKey::Street).to_string(),
        city: row.mapped(mapping, FieldKey::City).to_string(),
        state: row.mapped(mapping, FieldKey::State).to_string(),
        zip_code: row.mapped(mapping, FieldKey::Zip).to_string(),
        tags: normalize_tags(row.mapped(mapping, FieldKey::Tags)),
        short_summary: build_short_summary(row, mapping),
        add_to_import_note: build_import_note(row, mapping),
    }
}

/// Convert every source row, producing one narrative line per row.
pub fn convert_source(bytes: &[u8], mapping: &ColumnMapping) -> Result<Conversion, ConvertError> {
    let source_rows = read_source_rows(bytes)?;
    let mut rows = Vec::with_capacity(source_rows.len());
    let mut row_logs = Vec::with_capacity(source_rows.len());

    for (index, source_row) in source_rows.iter().enumerate() {
        let record = convert_row(source_row, mapping);
        let name = if record.full_name.is_empty() {
            "(No Name)"
        } else {
            &record.full_name
        };
        let email = if record.email.is_empty() {
            "(No Email)"
        } else {
            &record.email
        };
        row_logs.push(format!("Row {}: {name} - {email}", index + 1));
        rows.push(record);
    }

    Ok(Conversion { rows, row_logs })
}

/// Serialize rows to Sierra CSV. The header row is always written, even for
/// an empty slice.
pub fn write_sierra_csv(rows: &[SierraRecord]) -> Result<Vec<u8>, ConvertError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(SIERRA_COLUMNS)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|err| ConvertError::Csv(err.into_error().into()))
}

/// Number of output files needed for `total` rows; zero rows need none.
pub fn chunk_count(total: usize) -> usize {
    total.div_ceil(SIERRA_MAX_ROWS)
}

pub fn output_filename(stem: &str, chunk_index: usize, chunk_total: usize) -> String {
    if chunk_total <= 1 {
        format!("{stem}-sierra.csv")
    } else {
        format!("{stem}-sierra-chunk{}.csv", chunk_index + 1)
    }
}

/// Filename without its final extension, mirroring `Path::file_stem` for
/// plain names.
pub fn file_stem(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => filename,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
