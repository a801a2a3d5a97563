//! Process state machines and the groups that own them.

mod fsm;
mod group;

pub use fsm::{ExitRecord, ProcessFsm, ProcessState};
pub use group::ProcessGroup;
