use std::io;

use ::csv::{Writer, WriterBuilder};

use super::{Exporter, Sink};
use crate::error::{Error, Result};
use crate::types::{display_value, ScanValue};

pub const ID: &str = "exporter.csv";
pub const EXTENSION: &str = "csv";

/// Comma-separated values with a header row of column names.
#[derive(Default)]
pub struct CsvExporter {
    writer: Option<Writer<Sink>>,
    append: bool,
}

impl CsvExporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn writer(&mut self) -> Result<&mut Writer<Sink>> {
        self.writer.as_mut().ok_or(Error::ExporterNotStarted)
    }
}

impl Exporter for CsvExporter {
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
        self.writer = Some(WriterBuilder::new().flexible(true).from_writer(sink));
        Ok(())
    }

    fn set_fetchers(&mut self, names: &[String]) -> Result<()> {
        let append = self.append;
        let writer = self.writer()?;
        if !append {
            writer.write_record(names).map_err(io::Error::from)?;
        }
        Ok(())
    }

    fn next_address_results(&mut self, results: &[Option<ScanValue>]) -> Result<()> {
        let writer = self.writer()?;
        writer
            .write_record(results.iter().map(display_value))
            .map_err(io::Error::from)?;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        let mut writer = self.writer.take().ok_or(Error::ExporterNotStarted)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::test_util::SharedBuf;
    use std::collections::BTreeSet;

    #[test]
    fn header_and_rows() {
        let buf = SharedBuf::default();
        let mut exporter = CsvExporter::new();
        exporter.start(Box::new(buf.clone()), "").unwrap();
        exporter
            .set_fetchers(&["IP".to_string(), "Ports".to_string(), "Web detect".to_string()])
            .unwrap();
        exporter
            .next_address_results(&[
                Some(ScanValue::Text("10.0.0.1".into())),
                Some(ScanValue::Ports(BTreeSet::from([22, 80]))),
                Some(ScanValue::Text("Apache, on \"Linux\"".into())),
            ])
            .unwrap();
        exporter
            .next_address_results(&[Some(ScanValue::Text("10.0.0.2".into())), None, None])
            .unwrap();
        exporter.end().unwrap();

        assert_eq!(
            buf.contents(),
            "IP,Ports,Web detect\n\
             10.0.0.1,\"22,80\",\"Apache, on \"\"Linux\"\"\"\n\
             10.0.0.2,,\n"
        );
    }

    #[test]
    fn append_skips_header() {
        let buf = SharedBuf::default();
        let mut exporter = CsvExporter::new();
        exporter.set_append(true);
        exporter.start(Box::new(buf.clone()), "").unwrap();
        exporter.set_fetchers(&["IP".to_string()]).unwrap();
        exporter
            .next_address_results(&[Some(ScanValue::Text("10.0.0.9".into()))])
            .unwrap();
        exporter.end().unwrap();
        assert_eq!(buf.contents(), "10.0.0.9\n");
    }
}
