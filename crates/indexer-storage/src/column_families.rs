//! Column family definitions for RocksDB.
//!
//! - events: event id -> JSON stored event record
//! - event_states: `{STATE}:{event id}` -> empty, one entry per event

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for stored event records
pub const CF_EVENTS: &str = "events";

/// Column family name for the processing-state index
pub const CF_EVENT_STATES: &str = "event_states";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_EVENTS, CF_EVENT_STATES];

/// Create column family options for event records (compressed)
fn events_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_EVENTS, events_options()),
        ColumnFamilyDescriptor::new(CF_EVENT_STATES, Options::default()),
    ]
}
