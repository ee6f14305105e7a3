use std::io::{self, Write};

use serde_json::{Map, Value};

use super::{Exporter, Output, Sink};
use crate::error::Result;
use crate::types::ScanValue;

pub const ID: &str = "exporter.json";
pub const EXTENSION: &str = "jsonl";

/// JSON lines: one object per subject, keyed by column name.
#[derive(Default)]
pub struct JsonExporter {
    output: Output,
    append: bool,
    names: Vec<String>,
}

impl JsonExporter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn to_json(value: &Option<ScanValue>) -> Value {
    match value {
        None => Value::Null,
        Some(ScanValue::Address(ip)) => Value::String(ip.to_string()),
        Some(ScanValue::Text(s)) => Value::String(s.clone()),
        Some(ScanValue::Latency(d)) => Value::from(d.as_millis() as u64),
        Some(ScanValue::Ports(ports)) => Value::from(ports.iter().copied().collect::<Vec<u16>>()),
    }
}

impl Exporter for JsonExporter {
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
        Ok(())
    }

    fn set_fetchers(&mut self, names: &[String]) -> Result<()> {
        self.output.get()?;
        self.names = names.to_vec();
        Ok(())
    }

    fn next_address_results(&mut self, results: &[Option<ScanValue>]) -> Result<()> {
        let out = self.output.get()?;
        let record: Map<String, Value> = self
            .names
            .iter()
            .cloned()
            .zip(results.iter().map(to_json))
            .collect();
        serde_json::to_writer(&mut *out, &record).map_err(io::Error::from)?;
        out.write_all(b"\n")?;
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.output.close()
    }
}
