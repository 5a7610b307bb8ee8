//! The packet catalog, grouped by protocol phase.

pub mod game_c2s;
pub mod game_s2c;
pub mod handshake;
pub mod lobby;
