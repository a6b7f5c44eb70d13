pub mod Spsc;

pub use Spsc::{SpscConsumerEnd, SpscProducerEnd};
