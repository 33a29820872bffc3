//! Standa motorized stages (XIMC controllers).
//!
//! - `api`: controller calls and data types, plus step/microstep helpers
//! - `stage`: the [`StandaStage`] driver implementing `MotionStage`
//! - `sim`: an in-process controller for the simulated testbed and tests
//! - `ffi`: the libximc binding (feature `instrument_standa`)

pub mod api;
#[cfg(feature = "instrument_standa")]
pub mod ffi;
pub mod sim;
pub mod stage;

pub use api::XimcApi;
#[cfg(feature = "instrument_standa")]
pub use ffi::LibXimc;
pub use sim::SimulatedXimc;
pub use stage::StandaStage;
