// CPU offload: keeps heavy synchronous work off the async scheduler

pub mod gate;
mod worker;

pub use gate::{CpuBound, CpuGate, GateStats};
