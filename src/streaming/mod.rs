pub mod animator;
pub mod cancel;
pub mod decoder;
pub mod reducer;
