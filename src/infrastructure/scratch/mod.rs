//! Scratch storage for buffered inputs

mod identification_request;

pub use identification_request::{IdentificationRequest, ScratchArea};
