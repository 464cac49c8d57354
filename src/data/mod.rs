//! Panel data model and flat-file provider.

mod flat_file;
mod frame;
mod panel;

pub use flat_file::FlatFileDataService;
pub use frame::Frame;
pub use panel::{DerivedSignal, SignalPanel};
