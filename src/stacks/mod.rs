//! The four stacks, in the order they must be built. Each builder takes the
//! output records of the stacks it depends on and returns its own.

pub mod application;
pub mod ecr;
pub mod networking;
pub mod shared;
