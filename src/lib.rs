//! # HCIT DAQ Core Library
//!
//! Control and data acquisition for a high-contrast imaging testbed: two
//! continuous deformable mirrors, a segmented DM, a fiber-coupled laser source,
//! motorized stages and a science camera.
//!
//! ## Crate Structure
//!
//! - **`config`**: Testbed configuration loaded with figment from TOML and the
//!   environment. See `config::TestbedConfig`.
//! - **`error`**: The `DaqError` enum used across the crate.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`hardware`**: Capability traits (`LaserSource`, `MotionStage`,
//!   `DeformableMirror`, `Camera`, ...), scoped connections, DM commands, the
//!   Standa and MCLS1 drivers and the simulated bench.
//! - **`testbed`**: The set of instruments experiments run against.
//! - **`imaging`**: Processed image acquisition (auto exposure, averaging,
//!   background subtraction, centering, saving).
//! - **`experiment`**: The experiment runner and the experiments: speckle
//!   nulling, DM sine alignment, COFFEE and PASTIS data sets.
//! - **`analysis`**: Fits, photometry and plots.
//! - **`storage`**: Frame writers, text matrices, data paths and the
//!   calibration database.
//! - **`types`**: Shared value types.

pub mod analysis;
pub mod config;
pub mod error;
pub mod experiment;
pub mod hardware;
pub mod imaging;
pub mod logging;
pub mod storage;
pub mod testbed;
pub mod types;
