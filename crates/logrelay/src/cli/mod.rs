pub mod generate;
pub mod start;
pub mod submit;
