pub mod engine;
pub mod parser;

pub use engine::PriceEngine;
