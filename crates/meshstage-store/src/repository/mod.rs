//! # Repository Module
//!
//! Database repository implementations for the config store.
//!
//! ## Available Repositories
//!
//! - [`parameter::ParameterRepository`] - Versioned key-value parameters

pub mod parameter;
