//! # causerie-media
//!
//! Local media handling for the chat pipeline: the thumbnail
//! derivation policy, dimension/duration probes, and the disk cache
//! that lets the UI render a sent file before the remote echo
//! round-trips.

pub mod cache;
pub mod error;
pub mod probe;
pub mod thumbnail;

pub use cache::MediaCache;
pub use error::{MediaError, ThumbnailError};
pub use probe::{
    image_dimensions, is_svg, looks_like_image, svg_dimensions, AvMetadata, AvProbe, NullProbe,
};
pub use thumbnail::{generate_thumbnail, ThumbnailInfo};
