/// JSON Lines datasets, JSON inputs, and the append-only upload log.
pub mod fs;
