//! Audio subsystem

pub mod buffer;
pub mod clock;
pub mod device;
pub mod output;

pub use buffer::{ChannelBuffers, RollingBuffer};
pub use clock::ClockSync;
pub use device::{get_output_device, list_output_devices, OutputDevice, OutputDeviceInfo};
pub use output::{AudioOutput, RenderState, StreamEvent, StreamStats};
