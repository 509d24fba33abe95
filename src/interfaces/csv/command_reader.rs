use crate::error::{PaymentError, Result};
use serde::Deserialize;
use std::fmt;
use std::io::Read;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Open,
    Fund,
    Authorize,
    Present,
    Balance,
    Available,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Open => "open",
            Op::Fund => "fund",
            Op::Authorize => "authorize",
            Op::Present => "present",
            Op::Balance => "balance",
            Op::Available => "available",
        };
        f.write_str(s)
    }
}

/// One row of a command file: `op, account, amount, flow`.
///
/// The account is kept as text and validated by the service, so a bad id is
/// reported as a processing error for that row alone.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Command {
    pub op: Op,
    pub account: String,
    #[serde(default)]
    pub amount: Option<u64>,
    /// Optional caller-chosen flow id for `authorize` and `present`.
    #[serde(default)]
    pub flow: Option<String>,
}

/// Reads commands from a CSV source.
///
/// This reader wraps `csv::Reader` and provides an iterator over `Result<Command>`.
/// It handles whitespace trimming and flexible record lengths automatically.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    /// Creates a new `CommandReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes commands.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_valid_stream() {
        let data = "op, account, amount, flow\nopen, a,,\nauthorize, a, 300, auth-1\nbalance, a";
        let reader = CommandReader::new(data.as_bytes());
        let results: Vec<Result<Command>> = reader.commands().collect();

        assert_eq!(results.len(), 3);
        let open = results[0].as_ref().unwrap();
        assert_eq!(open.op, Op::Open);
        assert_eq!(open.amount, None);

        let auth = results[1].as_ref().unwrap();
        assert_eq!(auth.account, "a");
        assert_eq!(auth.amount, Some(300));
        assert_eq!(auth.flow.as_deref(), Some("auth-1"));

        let balance = results[2].as_ref().unwrap();
        assert_eq!(balance.op, Op::Balance);
        assert_eq!(balance.flow, None);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "op, account, amount, flow\nrefund, a, 1,\npresent, a, lots,";
        let reader = CommandReader::new(data.as_bytes());
        let results: Vec<Result<Command>> = reader.commands().collect();

        assert!(results[0].is_err());
        assert!(results[1].is_err());
    }
}
