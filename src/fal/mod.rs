//! Client for the Fal queue API used for image-to-video generation.

mod queue;

pub use queue::{FalClient, FalConfig, FalError, VideoJob};
