use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::prelude::*;

// Column labels as they appear in uploaded files.
const HEADER_NAME: &str = "Название";
const HEADER_REGION: &str = "Регион";
const HEADER_DISTRICT: &str = "Район";
const HEADER_CITY: &str = "Город";
const HEADER_EMAIL: &str = "Email";
const HEADER_PHONE: &str = "Телефон";
const HEADER_CATEGORY: &str = "Рубрика";
const HEADER_SUBCATEGORY: &str = "Подрубрика";

/// One parsed CSV line. `category` and `subcategory` hold the raw
/// comma-separated lists; splitting happens in the loader.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompanyRow {
    pub name: String,
    pub region: String,
    pub district: String,
    pub city: String,
    pub email: String,
    pub phone: String,
    pub category: String,
    pub subcategory: String,
}

/// Column indexes resolved from the header row. A label missing from the
/// header projects to the empty string for every record.
#[derive(Debug, Clone, Copy, Default)]
struct Projection {
    name: Option<usize>,
    region: Option<usize>,
    district: Option<usize>,
    city: Option<usize>,
    email: Option<usize>,
    phone: Option<usize>,
    category: Option<usize>,
    subcategory: Option<usize>,
}

impl Projection {
    fn from_header(header: &StringRecord) -> Projection {
        let index: HashMap<&str, usize> = header
            .iter()
            .enumerate()
            .map(|(column, label)| (label.trim(), column))
            .collect();
        let column = |label: &str| index.get(label).copied();
        Projection {
            name: column(HEADER_NAME),
            region: column(HEADER_REGION),
            district: column(HEADER_DISTRICT),
            city: column(HEADER_CITY),
            email: column(HEADER_EMAIL),
            phone: column(HEADER_PHONE),
            category: column(HEADER_CATEGORY),
            subcategory: column(HEADER_SUBCATEGORY),
        }
    }

    fn project(&self, record: &StringRecord) -> CompanyRow {
        CompanyRow {
            name: field(record, self.name),
            region: field(record, self.region),
            district: field(record, self.district),
            city: field(record, self.city),
            email: field(record, self.email),
            phone: field(record, self.phone),
            category: field(record, self.category),
            subcategory: field(record, self.subcategory),
        }
    }
}

fn field(record: &StringRecord, column: Option<usize>) -> String {
    column
        .and_then(|i| record.get(i))
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Reads a whole `;`-delimited file into row records. The first record is
/// the header. Any I/O or malformed-record failure fails the file; there is
/// no partial result.
pub fn parse_file(path: &Path) -> Result<Vec<CompanyRow>> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(file);

    let mut records = reader.records();
    let header = match records.next() {
        Some(record) => record.map_err(|source| ImportError::Csv {
            path: path.to_path_buf(),
            source,
        })?,
        None => return Ok(Vec::new()),
    };
    let projection = Projection::from_header(&header);

    let mut rows = Vec::new();
    for record in records {
        let record = record.map_err(|source| ImportError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        rows.push(projection.project(&record));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn projects_by_header_labels() {
        let file = write_file(
            "Название;Регион;Район;Город;Email;Телефон;Рубрика;Подрубрика\n\
             Кафе А;Р1;;Г1;a@b.ru;+7 900 000-00-00;Еда, Кафе;Торты\n"
                .as_bytes(),
        );
        let rows = parse_file(file.path()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Кафе А");
        assert_eq!(rows[0].region, "Р1");
        assert_eq!(rows[0].district, "");
        assert_eq!(rows[0].city, "Г1");
        assert_eq!(rows[0].category, "Еда, Кафе");
        assert_eq!(rows[0].subcategory, "Торты");
    }

    #[test]
    fn header_order_does_not_matter() {
        let file = write_file("Город;Название\nГ1;Кафе\n".as_bytes());
        let rows = parse_file(file.path()).unwrap();
        assert_eq!(rows[0].name, "Кафе");
        assert_eq!(rows[0].city, "Г1");
        assert_eq!(rows[0].region, "");
    }

    #[test]
    fn missing_headers_project_to_empty_strings() {
        let file = write_file("Название\nОдин\n".as_bytes());
        let rows = parse_file(file.path()).unwrap();
        assert_eq!(
            rows[0],
            CompanyRow {
                name: "Один".into(),
                ..CompanyRow::default()
            }
        );
    }

    #[test]
    fn fields_are_trimmed() {
        let file = write_file("Название;Город\n  Кафе  ;  Г1\n".as_bytes());
        let rows = parse_file(file.path()).unwrap();
        assert_eq!(rows[0].name, "Кафе");
        assert_eq!(rows[0].city, "Г1");
    }

    #[test]
    fn short_records_project_missing_columns_as_empty() {
        let file = write_file("Название;Регион;Город\nКафе\n".as_bytes());
        let rows = parse_file(file.path()).unwrap();
        assert_eq!(rows[0].name, "Кафе");
        assert_eq!(rows[0].region, "");
        assert_eq!(rows[0].city, "");
    }

    #[test]
    fn empty_file_is_an_empty_batch() {
        let file = write_file(b"");
        assert!(parse_file(file.path()).unwrap().is_empty());
    }

    #[test]
    fn header_only_file_is_an_empty_batch() {
        let file = write_file("Название;Город\n".as_bytes());
        assert!(parse_file(file.path()).unwrap().is_empty());
    }

    #[test]
    fn invalid_utf8_fails_the_whole_file() {
        let file = write_file(b"\xD0\x9D\xFF\xFE;x\na;b\n");
        let err = parse_file(file.path()).unwrap_err();
        assert!(matches!(err, ImportError::Csv { .. }));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = parse_file(Path::new("/nonexistent/definitely.csv")).unwrap_err();
        assert!(matches!(err, ImportError::Io(_)));
    }
}
