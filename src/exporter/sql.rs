//! SQL statements, suitable for sqlite, mysql and friends.
//!
//! Every column is `varchar(20)` and every value a quoted literal, written
//! verbatim. One `INSERT` is emitted per subject as results arrive.

use std::io::Write;

use super::{Exporter, Output, Sink};
use crate::error::Result;
use crate::types::{display_value, ScanValue};

pub const ID: &str = "exporter.sql";
pub const EXTENSION: &str = "sql";

const TABLE_NAME: &str = "scan";
const COLUMN_TYPE: &str = "varchar(20)";

#[derive(Default)]
pub struct SqlExporter {
    output: Output,
    append: bool,
}

impl SqlExporter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Exporter for SqlExporter {
    fn id(&self) -> &'static str {
        ID
    }

    fn filename_extension(&self) -> &'static str {
        EXTENSION
    }

    fn set_append(&mut self, append: bool) {
        self.append = append;
    }

    fn is_append(&self) -> bool {
        self.append
    }

    fn start(&mut self, sink: Sink, _feeder_info: &str) -> Result<()> {
        self.output.open(sink);
        if !self.append {
            // No space before the table name: existing consumers of these
            // dumps match this statement byte for byte.
            writeln!(self.output.get()?, "DROP TABLE IF EXISTS{TABLE_NAME};")?;
        }
        Ok(())
    }

    fn set_fetchers(&mut self, names: &[String]) -> Result<()> {
        let out = self.output.get()?;
        if self.append {
            return Ok(());
        }
        let columns: Vec<String> = names
            .iter()
            .map(|name| format!("`{name}` {COLUMN_TYPE}"))
            .collect();
        writeln!(out, "CREATE TABLE {TABLE_NAME} ({});", columns.join(", "))?;
        Ok(())
    }

    fn next_address_results(&mut self, results: &[Option<ScanValue>]) -> Result<()> {
        let out = self.output.get()?;
        let values: Vec<String> = results
            .iter()
            .map(|value| format!("'{}'", display_value(value)))
            .collect();
        writeln!(out, "INSERT INTO {TABLE_NAME} VALUES ({});", values.join(", "))?;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.output.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::test_util::SharedBuf;
    use std::net::{IpAddr, Ipv4Addr};

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fresh_session_writes_schema_and_inserts() {
        let buf = SharedBuf::default();
        let mut exporter = SqlExporter::new();
        exporter.start(Box::new(buf.clone()), "10.0.0.1 - 10.0.0.1").unwrap();
        exporter.set_fetchers(&names(&["ip", "hostname"])).unwrap();
        exporter
            .next_address_results(&[
                Some(ScanValue::Address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))),
                Some(ScanValue::Text("host1".into())),
            ])
            .unwrap();
        exporter.end().unwrap();

        assert_eq!(
            buf.contents(),
            "DROP TABLE IF EXISTSscan;\n\
             CREATE TABLE scan (`ip` varchar(20), `hostname` varchar(20));\n\
             INSERT INTO scan VALUES ('10.0.0.1', 'host1');\n"
        );
    }

    #[test]
    fn append_session_writes_inserts_only() {
        let buf = SharedBuf::default();
        let mut exporter = SqlExporter::new();
        exporter.set_append(true);
        exporter.start(Box::new(buf.clone()), "").unwrap();
        exporter.set_fetchers(&names(&["ip", "ping"])).unwrap();
        for host in ["a", "b", "c"] {
            exporter
                .next_address_results(&[Some(ScanValue::Text(host.into())), None])
                .unwrap();
        }
        exporter.end().unwrap();

        let out = buf.contents();
        assert!(!out.contains("DROP"));
        assert!(!out.contains("CREATE"));
        assert_eq!(
            out,
            "INSERT INTO scan VALUES ('a', '');\n\
             INSERT INTO scan VALUES ('b', '');\n\
             INSERT INTO scan VALUES ('c', '');\n"
        );
    }

    #[test]
    fn single_column() {
        let buf = SharedBuf::default();
        let mut exporter = SqlExporter::new();
        exporter.start(Box::new(buf.clone()), "").unwrap();
        exporter.set_fetchers(&names(&["IP"])).unwrap();
        exporter
            .next_address_results(&[Some(ScanValue::Text("x".into()))])
            .unwrap();
        assert!(buf
            .contents()
            .ends_with("CREATE TABLE scan (`IP` varchar(20));\nINSERT INTO scan VALUES ('x');\n"));
    }
}
