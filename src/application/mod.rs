//! # Application Layer
//!
//! Trait seams and the use cases orchestrating domain and connector layers.

pub mod interfaces;
pub mod use_cases;

pub use interfaces::*;
pub use use_cases::*;
