pub mod events;
pub mod image_codec;
pub mod surface;
pub mod transport;
