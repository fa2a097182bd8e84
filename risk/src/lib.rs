pub mod breaker;
pub mod gate;
pub mod types;
