//! Downstream analyses reading the IR. Currently the static control part
//! (SCoP) detection attaching polyhedral region annotations.

pub mod scop;

pub use self::scop::mark_scops;
