use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One output row. Columns that do not apply to a command are left empty.
#[derive(Debug, Serialize, Clone, PartialEq, Eq, Default)]
pub struct OutcomeRecord {
    pub op: String,
    pub account: String,
    pub amount: Option<u64>,
    pub outcome: String,
    pub debits_posted: Option<u64>,
    pub credits_posted: Option<u64>,
    pub debits_pending: Option<u64>,
    pub credits_pending: Option<u64>,
    pub available: Option<u64>,
}

/// Writes outcome rows as CSV, header first.
pub struct OutcomeWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> OutcomeWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write(&mut self, record: &OutcomeRecord) -> Result<()> {
        self.writer.serialize(record)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
