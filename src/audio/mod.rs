pub mod capture;
pub mod levels;
pub mod spectrum;
