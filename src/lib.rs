pub mod config;
pub mod logging;
pub mod observer;
pub mod types;

#[cfg(test)]
pub mod testing;
