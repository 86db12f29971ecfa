pub mod events_broadcast;
pub mod image_rs;
pub mod surface_memory;
pub mod transport_ws;
