//! the test_utils folder here will share utils or test components between unit
//! tests
mod common;
mod memory;

pub use common::*;
pub use memory::*;
