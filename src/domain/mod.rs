//! Domain layer - Core business logic
//!
//! This module contains the core domain entities, repository traits,
//! and domain services. It knows nothing about container file formats.

pub mod entities;
pub mod repositories;
pub mod services;
