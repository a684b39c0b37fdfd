pub mod capture;
pub mod color;
