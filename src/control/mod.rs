pub mod payload;
pub mod run_loop;
pub mod smoothing;
