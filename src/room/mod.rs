pub mod coordinator;
pub mod registry;
pub mod server;

pub use coordinator::Coordinator;
pub use registry::{JoinOutcome, RoomRegistry, ROOM_CAPACITY};
