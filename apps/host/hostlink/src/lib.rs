// Library exports for testing
// The binary (main.rs) imports these as well

pub mod error;
pub mod executor;
pub mod host_loop;
pub mod logger;
pub mod paths;
