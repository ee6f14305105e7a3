//! Exporters serialize scan results to a byte sink.
//!
//! A session is driven by a single writer in this order: [`Exporter::start`],
//! [`Exporter::set_fetchers`] once, [`Exporter::next_address_results`] per
//! subject, then [`Exporter::end`]. Sink errors are returned as
//! [`Error::Io`] and end the session.

use std::io::Write;
use std::path::Path;

use crate::error::{Error, Result};
use crate::types::ScanValue;

pub mod csv;
pub mod json;
pub mod sql;

pub use self::csv::CsvExporter;
pub use self::json::JsonExporter;
pub use self::sql::SqlExporter;

/// Output sink handed to an exporter for one session.
pub type Sink = Box<dyn Write + Send>;

pub trait Exporter: Send {
    /// Stable identifier, e.g. `exporter.sql`.
    fn id(&self) -> &'static str;

    fn filename_extension(&self) -> &'static str;

    /// In append mode the exporter assumes the sink already holds a
    /// compatible header or schema and writes records only.
    fn set_append(&mut self, append: bool);

    fn is_append(&self) -> bool;

    fn start(&mut self, sink: Sink, feeder_info: &str) -> Result<()>;

    /// Declare the column names. Values passed to every following
    /// `next_address_results` call must be aligned with them.
    fn set_fetchers(&mut self, names: &[String]) -> Result<()>;

    fn next_address_results(&mut self, results: &[Option<ScanValue>]) -> Result<()>;

    /// Flush and release the sink.
    fn end(&mut self) -> Result<()>;
}

/// Holds the sink between `start` and `end`.
#[derive(Default)]
pub(crate) struct Output {
    sink: Option<Sink>,
}

impl Output {
    pub(crate) fn open(&mut self, sink: Sink) {
        self.sink = Some(sink);
    }

    pub(crate) fn get(&mut self) -> Result<&mut Sink> {
        self.sink.as_mut().ok_or(Error::ExporterNotStarted)
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        match self.sink.take() {
            Some(mut sink) => Ok(sink.flush()?),
            None => Err(Error::ExporterNotStarted),
        }
    }
}

const ALL: &[(&str, &str)] = &[
    (sql::ID, sql::EXTENSION),
    (self::csv::ID, self::csv::EXTENSION),
    (json::ID, json::EXTENSION),
];

pub fn all_ids() -> impl Iterator<Item = &'static str> {
    ALL.iter().map(|(id, _)| *id)
}

/// Look up an exporter by id (`exporter.sql`) or short name (`sql`).
pub fn by_id(id: &str) -> Result<Box<dyn Exporter>> {
    let id = id.trim();
    let short = id.strip_prefix("exporter.").unwrap_or(id);
    match short.to_ascii_lowercase().as_str() {
        "sql" => Ok(Box::new(SqlExporter::new())),
        "csv" => Ok(Box::new(CsvExporter::new())),
        "json" => Ok(Box::new(JsonExporter::new())),
        _ => Err(Error::UnknownExporter(id.to_string())),
    }
}

pub fn by_extension(extension: &str) -> Result<Box<dyn Exporter>> {
    let ext = extension.trim_start_matches('.');
    ALL.iter()
        .find(|(_, e)| e.eq_ignore_ascii_case(ext))
        .map(|(id, _)| by_id(id))
        .unwrap_or_else(|| Err(Error::UnknownExporter(extension.to_string())))
}

/// Pick the exporter from an output file name.
pub fn for_path(path: &Path) -> Result<Box<dyn Exporter>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| Error::UnknownExporter(path.display().to_string()))?;
    by_extension(ext)
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    /// A sink whose contents stay readable after the exporter took ownership.
    #[derive(Clone, Default)]
    pub struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_id_and_extension() {
        assert_eq!(by_id("exporter.sql").unwrap().id(), "exporter.sql");
        assert_eq!(by_id("CSV").unwrap().id(), "exporter.csv");
        assert_eq!(by_extension("jsonl").unwrap().id(), "exporter.json");
        assert_eq!(by_extension(".sql").unwrap().filename_extension(), "sql");
        assert_eq!(for_path(Path::new("out/scan.csv")).unwrap().id(), "exporter.csv");
        assert!(by_id("exporter.xml").is_err());
        assert!(for_path(Path::new("noext")).is_err());
    }

    #[test]
    fn ids_are_listed() {
        let ids: Vec<_> = all_ids().collect();
        assert_eq!(ids, vec!["exporter.sql", "exporter.csv", "exporter.json"]);
    }

    #[test]
    fn writing_before_start_is_an_error() {
        for id in all_ids() {
            let mut exporter = by_id(id).unwrap();
            assert!(matches!(
                exporter.next_address_results(&[None]),
                Err(Error::ExporterNotStarted)
            ));
        }
    }
}
