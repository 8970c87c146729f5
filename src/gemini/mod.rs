//! Client for the Gemini generateContent REST API: ad copy drafting (text)
//! and product-shot rendering (image), both optionally conditioned on an
//! inlined source image.

pub mod config;
mod content;
mod image;

pub use content::{GeminiClient, GeminiError, InlinePayload};
pub use image::GeneratedImage;
