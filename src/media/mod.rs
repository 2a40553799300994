pub mod devices;
pub mod screen;

pub use devices::{
    DisplayStream, FrameSource, MediaConstraints, MediaDevices, MediaStream, MediaTrack, TrackKind,
};
pub use screen::{encode_jpeg, ScreenCapture};
