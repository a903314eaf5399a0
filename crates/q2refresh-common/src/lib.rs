#![allow(clippy::needless_range_loop, clippy::too_many_arguments, clippy::manual_range_contains)]
// Shared vocabulary for the refresh crates: math, on-disk formats, cvars and commands.

pub mod cmd;
pub mod cvar;
pub mod q_shared;
pub mod qfiles;
