pub mod config;
pub mod database;
pub mod error;
pub mod feed;
pub mod importer;
pub mod outcome;
pub mod parser;
pub mod queue;
pub mod s3;
pub mod task;
pub mod writer;
pub mod xml;

#[cfg(test)]
pub mod testing;
