//! Apiary: a JSON-RPC application server.
//!
//! The binary runs either a single application process (`serve`) or a
//! supervisor keeping several of them alive (`cluster`).

pub mod api;
pub mod cli;
pub mod launch;
