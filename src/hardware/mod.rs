//! Testbed hardware
//!
//! - `capabilities`: async traits every instrument implements
//! - `session`: scoped open/close of an instrument
//! - `dm`, `segmented`: DM command types
//! - `frame`: camera frames
//! - `mcls1`, `serial`: Thorlabs MCLS1 laser source over a line transport
//! - `standa`: Standa XIMC motorized stages
//! - `sim`: the simulated bench

pub mod capabilities;
pub mod dm;
pub mod frame;
pub mod mcls1;
pub mod segmented;
pub mod serial;
pub mod session;
pub mod sim;
pub mod standa;

pub use capabilities::{
    Camera, Connection, DeformableMirror, ExposureControl, FrameGrabber, LaserSource, MotionStage,
    SegmentedMirror,
};
pub use frame::Frame;
pub use session::scoped;
