mod store;

pub use store::{ErrorKind, LastError, PollerPhase, PollerState, SharedPollerState};
