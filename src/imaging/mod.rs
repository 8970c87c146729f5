//! Image-URL resolution pipeline.
//!
//! Turns an arbitrary, possibly-unreachable image URL into a URL the
//! downstream AI image/video providers can actually fetch: try the URL
//! itself, then a CDN-stripped rewrite, then a public resizing proxy, and
//! finally degrade to a placeholder. Resolution never fails; failure is
//! encoded in the returned [`ProcessingResult`].

mod probe;
mod proxy;
mod resolve;
mod rewrite;

pub use probe::{FetchFailure, HttpFetch, ProbeConfig, ProbeFetch, ProbeSnapshot, Prober};
pub use proxy::build_proxy_url;
pub use resolve::{
    ImageResolver, ProcessingMethod, ProcessingResult, ResolverConfig, is_valid_image_url,
};
pub use rewrite::strip_cdn_directives;
