use std::collections::BTreeMap;
use thiserror::Error;

pub const UUID_COLUMN: &str = "_uuid";
pub const FACILITY_COLUMN: &str = "FACILITY";
pub const ASSESSMENT_DATE_COLUMN: &str = "ASSESSMENT_DATE";

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Cell values the Kobo export tooling reads as missing.
const NA_VALUES: [&str; 19] = [
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("read source extract: {0}")]
    Csv(#[from] csv::Error),
    #[error("source extract has no `{0}` column")]
    MissingColumn(&'static str),
    #[error("source record on line {line} has {fields} fields, header has {expected}")]
    TooManyFields {
        line: u64,
        fields: usize,
        expected: usize,
    },
}

pub fn is_na(raw: &str) -> bool {
    NA_VALUES.contains(&raw)
}

/// One survey record: column name -> raw cell text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRow {
    cells: BTreeMap<String, String>,
}

impl SourceRow {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            cells: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// The cell value, or `None` when the column is absent or the cell is NA.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .get(column)
            .map(String::as_str)
            .filter(|v| !is_na(v))
    }

    pub fn source_uuid(&self) -> Option<&str> {
        self.get(UUID_COLUMN)
    }
}

pub fn parse_rows(bytes: &[u8], delimiter: u8) -> Result<Vec<SourceRow>, SourceError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    if !headers.iter().any(|h| h == UUID_COLUMN) {
        return Err(SourceError::MissingColumn(UUID_COLUMN));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        // Short records read as missing trailing cells; long ones cannot be aligned.
        if record.len() > headers.len() {
            return Err(SourceError::TooManyFields {
                line: record.position().map_or(0, |p| p.line()),
                fields: record.len(),
                expected: headers.len(),
            });
        }
        rows.push(SourceRow::from_pairs(
            headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.to_string(), v.to_string())),
        ));
    }
    Ok(rows)
}
