pub mod rr_file;
pub mod snapshot;
pub mod text;
pub mod trace;

pub use rr_file::{export_rr, read_rr_file, write_rr_tsv};
pub use snapshot::{load_snapshot, save_snapshot};
pub use trace::{read_trace_csv, read_trace_from};
