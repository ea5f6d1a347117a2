//! Pure domain calculations.

mod sample_size;

pub use sample_size::calculate_sample_size;
