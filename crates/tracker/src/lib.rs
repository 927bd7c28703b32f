pub mod csv_io;
pub mod store;

pub use csv_io::{export_csv, import_csv, ImportOutcome};
pub use store::{EntrySummary, ManualEntryStore};
