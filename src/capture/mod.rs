pub mod device;
pub mod recorder;
pub mod wav;

pub use device::{AudioFrame, CaptureConfig, CaptureDevice, CaptureError, SegmentHandle};
pub use recorder::{AudioSegment, SegmentRecorder, SegmentStatus};
pub use wav::WavCaptureDevice;
