//! Background tasks.

pub mod token_cleanup;
