//! Core data types for the command queue

pub mod descriptor;
pub mod events;
pub mod ids;
pub mod message;
pub mod priority;
pub mod status;

pub use descriptor::CommandDescriptor;
pub use events::QueueEvent;
pub use ids::DescriptorId;
pub use message::CommandMessage;
pub use priority::Priority;
pub use status::ProcessorStatus;
