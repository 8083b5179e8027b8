//! Multiblock is an execution substrate for simulations on structured,
//! rectilinear grids partitioned into blocks. A grid is described once by
//! a distribution (the partition table plus the overlap regions connecting
//! neighboring blocks); the resident blocks of each process own their cell
//! data outright and exchange ghost regions by message passing. User code
//! writes grid operations against sub-boxes in global coordinates and a
//! dispatch engine clips, schedules, and runs them over whatever partition
//! the grid happens to have, so the same operation runs unchanged on one
//! block or on a thousand spread over many processes.

pub mod block;
pub mod communicator;
pub mod dispatch;
pub mod distribution;
pub mod geometry;
pub mod message;
pub mod multi_block;
pub mod processor;
pub mod statistics;
