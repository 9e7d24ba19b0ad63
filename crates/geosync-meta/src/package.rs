//! Catalog record packages.
//!
//! A record export is a zip archive with an `index.csv` sidecar (`;`
//! delimited, header row then one data row) naming the record `uuid` and its
//! `schema`, and the document itself at `{uuid}/metadata/metadata.xml`.

use crate::types::Schema;
use crate::MetaError;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const INDEX_ENTRY: &str = "index.csv";

/// Properties read from the package `index.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageIndex {
    pub uuid: String,
    pub schema: Schema,
    /// Every column of the data row, including `uuid` and `schema`.
    pub properties: BTreeMap<String, String>,
}

impl PackageIndex {
    pub fn parse(text: &str) -> Result<Self, MetaError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        let header = reader.headers().map_err(malformed_index)?.clone();
        if header.is_empty() {
            return Err(MetaError::Format("index.csv is empty".to_owned()));
        }
        let row = reader
            .records()
            .next()
            .ok_or_else(|| MetaError::Format("index.csv has no data row".to_owned()))?
            .map_err(malformed_index)?;

        let properties: BTreeMap<String, String> = header
            .iter()
            .zip(row.iter())
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect();
        let uuid = properties
            .get("uuid")
            .filter(|u| !u.is_empty())
            .cloned()
            .ok_or_else(|| MetaError::Format("index.csv has no uuid column".to_owned()))?;
        let schema = properties
            .get("schema")
            .map(|s| Schema::from_id(s))
            .unwrap_or_default();
        Ok(Self {
            uuid,
            schema,
            properties,
        })
    }

    pub fn document_path(&self) -> String {
        format!("{}/metadata/metadata.xml", self.uuid)
    }
}

fn malformed_index(err: csv::Error) -> MetaError {
    MetaError::Format(format!("malformed index.csv: {err}"))
}

/// The raw package plus what its index says about it.
#[derive(Debug, Clone)]
pub struct RecordPackage {
    bytes: Vec<u8>,
    index: PackageIndex,
}

impl RecordPackage {
    pub fn open(bytes: Vec<u8>) -> Result<Self, MetaError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes.as_slice()))?;
        let index_csv = read_entry(&mut archive, INDEX_ENTRY)?;
        let index = PackageIndex::parse(&String::from_utf8_lossy(&index_csv))?;
        Ok(Self { bytes, index })
    }

    pub fn index(&self) -> &PackageIndex {
        &self.index
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn document_path(&self) -> String {
        self.index.document_path()
    }

    /// Bytes of the metadata document named by the index.
    pub fn document(&self) -> Result<Vec<u8>, MetaError> {
        let mut archive = ZipArchive::new(Cursor::new(self.bytes.as_slice()))?;
        read_entry(&mut archive, &self.document_path())
    }

    /// Rebuild the archive with the document entry replaced by `data`.
    ///
    /// Every other entry is copied raw, so its bytes and compression method
    /// are untouched; entry order is preserved and the document keeps its
    /// original compression method.
    pub fn with_document(&self, data: &[u8]) -> Result<Vec<u8>, MetaError> {
        replace_entry(&self.bytes, &self.document_path(), data)
    }

    /// Build a minimal package: the index and a deflated document.
    pub fn assemble(uuid: &str, schema: &Schema, document: &[u8]) -> Result<Vec<u8>, MetaError> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(document.len() + 256)));
        writer.start_file(
            INDEX_ENTRY,
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored),
        )?;
        write!(writer, "\"uuid\";\"schema\"\n\"{uuid}\";\"{}\"\n", schema.id())?;
        writer.start_file(
            format!("{uuid}/metadata/metadata.xml"),
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated),
        )?;
        writer.write_all(document)?;
        Ok(writer.finish()?.into_inner())
    }
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, MetaError> {
    let mut entry = archive.by_name(name).map_err(|e| match e {
        zip::result::ZipError::FileNotFound => {
            MetaError::Format(format!("record package has no entry '{name}'"))
        }
        other => MetaError::Package(other),
    })?;
    let mut out = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry.read_to_end(&mut out)?;
    Ok(out)
}

pub(crate) fn replace_entry(
    package: &[u8],
    target: &str,
    data: &[u8],
) -> Result<Vec<u8>, MetaError> {
    let mut archive = ZipArchive::new(Cursor::new(package))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(package.len())));
    let mut replaced = false;

    for i in 0..archive.len() {
        let entry = archive.by_index_raw(i)?;
        if entry.name() == target {
            let options = SimpleFileOptions::default().compression_method(entry.compression());
            drop(entry);
            writer.start_file(target, options)?;
            writer.write_all(data)?;
            replaced = true;
        } else {
            writer.raw_copy_file(entry)?;
        }
    }
    if !replaced {
        return Err(MetaError::Format(format!(
            "record package has no entry '{target}'"
        )));
    }
    tracing::debug!("repackaged record, replaced {target} ({} bytes)", data.len());
    Ok(writer.finish()?.into_inner())
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use zip::CompressionMethod;

    #[test]
    fn index_parses_quoted_semicolon_rows() {
        let index = PackageIndex::parse(
            "\"schema\";\"uuid\";\"createDate\"\n\"iso19115-3.2018\";\"abc-123\";\"2024-01-01\"\n",
        )
        .unwrap();
        assert_eq!(index.uuid, "abc-123");
        assert_eq!(index.schema, Schema::Iso19115_3);
        assert_eq!(index.properties["createDate"], "2024-01-01");
        assert_eq!(index.document_path(), "abc-123/metadata/metadata.xml");
    }

    #[test]
    fn index_fields_may_quote_delimiters_and_newlines() {
        let index = PackageIndex::parse(
            "\"uuid\";\"title\";\"schema\"\r\n\"u1\";\"Voies; vertes\n(2024) \"\"v2\"\"\";\"iso19115-3.2018\"\r\n",
        )
        .unwrap();
        assert_eq!(index.uuid, "u1");
        assert_eq!(index.schema, Schema::Iso19115_3);
        assert_eq!(index.properties["title"], "Voies; vertes\n(2024) \"v2\"");
    }

    #[test]
    fn index_schema_defaults_to_iso19139() {
        let index = PackageIndex::parse("uuid\nabc\n").unwrap();
        assert_eq!(index.schema, Schema::Iso19139);
    }

    #[test]
    fn index_without_data_row_is_a_format_error() {
        let err = PackageIndex::parse("uuid;schema\n").unwrap_err();
        assert!(matches!(err, MetaError::Format(_)));
        assert!(PackageIndex::parse("").is_err());
        assert!(PackageIndex::parse("schema\niso19139\n").is_err());
    }

    #[test]
    fn open_reads_document() {
        let zip = record_zip("u1", "iso19139", b"<r/>");
        let package = RecordPackage::open(zip).unwrap();
        assert_eq!(package.index().uuid, "u1");
        assert_eq!(package.document().unwrap(), b"<r/>");
    }

    #[test]
    fn assembled_package_opens() {
        let zip = RecordPackage::assemble("u2", &Schema::Iso19115_3, b"<mdb/>").unwrap();
        let package = RecordPackage::open(zip).unwrap();
        assert_eq!(package.index().uuid, "u2");
        assert_eq!(package.index().schema, Schema::Iso19115_3);
        assert_eq!(package.document().unwrap(), b"<mdb/>");
    }

    #[test]
    fn missing_index_is_a_format_error() {
        let zip = build_zip(&[("other.txt", b"x", CompressionMethod::Stored)]);
        let err = RecordPackage::open(zip).unwrap_err();
        assert!(err.to_string().contains("index.csv"));
    }

    #[test]
    fn missing_document_is_a_format_error() {
        let zip = build_zip(&[(
            INDEX_ENTRY,
            b"uuid;schema\nu1;iso19139\n",
            CompressionMethod::Stored,
        )]);
        let package = RecordPackage::open(zip).unwrap();
        let err = package.document().unwrap_err();
        assert!(matches!(err, MetaError::Format(_)));
    }

    #[test]
    fn not_a_zip_is_a_package_error() {
        let err = RecordPackage::open(b"not a zip".to_vec()).unwrap_err();
        assert!(matches!(err, MetaError::Package(_)));
    }

    #[test]
    fn with_document_preserves_other_entries() {
        let zip = record_zip("u1", "iso19139", b"<r>old</r>");
        let package = RecordPackage::open(zip.clone()).unwrap();
        let rebuilt = package.with_document(b"<r>new</r>").unwrap();

        let mut before = ZipArchive::new(Cursor::new(zip.as_slice())).unwrap();
        let mut after = ZipArchive::new(Cursor::new(rebuilt.as_slice())).unwrap();
        assert_eq!(before.len(), after.len());
        for i in 0..before.len() {
            let mut a = before.by_index(i).unwrap();
            let mut b = after.by_index(i).unwrap();
            assert_eq!(a.name(), b.name());
            assert_eq!(a.compression(), b.compression());
            let (mut da, mut db) = (Vec::new(), Vec::new());
            a.read_to_end(&mut da).unwrap();
            b.read_to_end(&mut db).unwrap();
            if a.name() == "u1/metadata/metadata.xml" {
                assert_eq!(db, b"<r>new</r>");
            } else {
                assert_eq!(da, db);
            }
        }
    }
}
