use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, WriterBuilder};
use std::{collections::HashSet, fs::File, io::Read, path::Path};

/// A dataset as it sits at rest: untyped text, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    /// Column names exactly as the header row spells them.
    pub headers: Vec<String>,
    /// One entry per data row, one field per header. `None` is a missing value.
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Parse a delimited flat file with a header row.
    ///
    /// Empty fields become `None`. Rows shorter than the header are padded with
    /// `None`; rows longer than the header are rejected. Header names are made
    /// usable as table columns with [`unique_headers`].
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()
            .context("reading header row")?
            .iter()
            .map(|h| h.to_string())
            .collect();
        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            bail!("missing header row");
        }
        let headers = unique_headers(headers);

        let width = headers.len();
        let mut table = RawTable::new(headers);
        for (idx, result) in rdr.records().enumerate() {
            let record = result.with_context(|| format!("CSV parse error at record {}", idx + 1))?;
            if record.len() > width {
                bail!(
                    "record {} has {} fields, header has {}",
                    idx + 1,
                    record.len(),
                    width
                );
            }
            let mut row: Vec<Option<String>> = record
                .iter()
                .map(|f| (!f.is_empty()).then(|| f.to_string()))
                .collect();
            row.resize(width, None);
            table.rows.push(row);
        }
        Ok(table)
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_csv_reader(bytes)
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Self::from_csv_reader(file).with_context(|| format!("parsing {}", path.display()))
    }

    /// Header row then every data row; `None` is written as an empty field.
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut wtr = WriterBuilder::new().from_writer(Vec::new());
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|v| v.as_deref().unwrap_or("")))?;
        }
        wtr.into_inner().context("flushing CSV writer")
    }
}

/// Name every column and make the names distinct ignoring ASCII case.
///
/// An empty name at position `i` becomes `Unnamed: i`; a repeated name gets a
/// `.n` suffix, counting up from 1 until the result is free.
pub fn unique_headers(raw: Vec<String>) -> Vec<String> {
    let mut taken: HashSet<String> = HashSet::with_capacity(raw.len());
    raw.into_iter()
        .enumerate()
        .map(|(i, name)| {
            let base = if name.is_empty() {
                format!("Unnamed: {}", i)
            } else {
                name
            };
            let mut candidate = base.clone();
            let mut n = 0;
            while taken.contains(&candidate.to_ascii_lowercase()) {
                n += 1;
                candidate = format!("{}.{}", base, n);
            }
            taken.insert(candidate.to_ascii_lowercase());
            candidate
        })
        .collect()
}
