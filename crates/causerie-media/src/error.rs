use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Vector graphic error: {0}")]
    Vector(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of asking for a thumbnail that should not be raised to the
/// user: `NotNeeded` means downloading the original is cheap enough.
#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("no thumbnail needed for this image")]
    NotNeeded,

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl From<image::ImageError> for ThumbnailError {
    fn from(err: image::ImageError) -> Self {
        Self::Media(MediaError::Image(err))
    }
}
