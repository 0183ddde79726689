//! Connection supervision: the single live session handle, the
//! disconnect → restore → reload → reconnect cycle, and the pairing
//! bootstrap.

pub mod pairing;
pub mod supervisor;

pub use {
    pairing::{PAIRING_DELAY, format_pairing_code, normalize_number},
    supervisor::{ConnectionSupervisor, SupervisorOptions, SupervisorState},
};
