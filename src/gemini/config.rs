use once_cell::sync::Lazy;
use std::env;

pub static GEMINI_API_KEY: Lazy<String> =
    Lazy::new(|| env::var("GEMINI_API_KEY").unwrap_or_default());

pub static ROOT: Lazy<String> = Lazy::new(|| {
    env::var("GEMINI_API_ROOT")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string())
});

pub static TEXT_MODEL: Lazy<String> =
    Lazy::new(|| env::var("GEMINI_TEXT_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string()));

pub static IMAGE_MODEL: Lazy<String> = Lazy::new(|| {
    env::var("GEMINI_IMAGE_MODEL").unwrap_or_else(|_| "gemini-2.5-flash-image-preview".to_string())
});
