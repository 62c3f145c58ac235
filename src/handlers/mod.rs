//! HTTP handlers

pub mod health;
pub mod log;

#[cfg(test)]
mod tests;
