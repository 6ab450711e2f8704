pub mod gemini;
pub mod image;
pub mod prompt;

pub use gemini::{GeminiClient, GeminiConfig};
pub use image::HttpImageFetcher;
