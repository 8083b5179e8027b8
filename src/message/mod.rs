//! A minimal message-passing layer behind the `Communicator` trait.
//! Implementors provide point-to-point `send` and `recv` over a transport
//! (a pure-Rust TCP transport is included); the trait derives broadcast,
//! reduce, and all-reduce collectives on top. The parallel block
//! communicator and the cross-process statistics combine are written
//! against the trait, not a transport.

mod backoff;
pub mod comm;
pub mod tcp;
pub mod util;
