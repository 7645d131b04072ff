pub mod channel;
pub mod detector;
pub mod polling;

pub use channel::ChannelDetector;
pub use detector::Detector;
pub use polling::PollingDetector;
