//! Observation export.

pub mod export;

pub use export::CsvPublisher;
