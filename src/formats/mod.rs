//! Binary output formats of the preparation stage.

pub mod fingerprint;
pub mod graph_file;
pub mod names_file;
pub mod restrictions_file;

pub use fingerprint::{FingerPrint, FINGERPRINT_SIZE};
pub use graph_file::{GraphFile, GraphFileWriter};
pub use names_file::{NameIndex, RangeTable, MAX_NAME_LENGTH};
