//! Event types serialised across the host-application boundary.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so host
//! applications (practice UIs, loggers) can forward them over whatever
//! transport they use without re-modelling the payloads.

pub mod events;
