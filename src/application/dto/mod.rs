//! Data Transfer Objects

mod identifier_options;

pub use identifier_options::IdentifierOptions;
