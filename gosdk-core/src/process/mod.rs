//! Running tools from a cached SDK as managed child processes.

pub mod env;
pub mod executable;
pub mod runner;

pub use env::EnvEdits;
pub use executable::{executable_variants, find_all_executables, find_executable, is_executable};
pub use runner::{run, ExitStatusInfo, ProcessSpec, READER_JOIN_GRACE, READER_LINGER};
