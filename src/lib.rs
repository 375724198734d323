//! Scheduled bulk imports of CSV/XML feeds into MongoDB collections.
//!
//! Each [`services::task::ImportTask`] owns a scope of its target collection;
//! running it fetches the feed, parses it into rows and replaces whatever the
//! scope filter matches with those rows.

pub mod helpers;
pub mod services;
