//! CSV batch interface: commands in, one outcome row per command out.

pub mod batch;
pub mod command_reader;
pub mod outcome_writer;
