pub mod clock;
pub mod config;
pub mod constants;
pub mod ecg;
pub mod error;
pub mod fall;
pub mod fusion;
pub mod host;
pub mod immobility;
pub mod ingest;
pub mod packet;
pub mod payload;
pub mod radio;
pub mod relay;
pub mod schema;
pub mod serial;
pub mod vitals;
pub mod wearable;

// Re-export the types most callers start from
pub use error::WsError;
pub use fall::{FallDetector, FallEvent, FallState};
pub use packet::{Packet, PacketType};
pub use payload::Payload;
