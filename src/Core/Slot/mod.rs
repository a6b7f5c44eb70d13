pub mod Descriptor;

pub use Descriptor::{ReadableSlotDescriptor, WritableSlotDescriptor};
