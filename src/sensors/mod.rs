// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Sensor module - camera, trigger and indicator interfaces plus simulations

mod acquisition;
mod frame_buffer;
mod simulator;
mod traits;
mod trigger;

pub use acquisition::{run_poll_ticker, Acquisition, AcquisitionStats, CameraHealth};
pub use frame_buffer::{FrameSlot, MAX_FRAMES_IN_FLIGHT};
pub use simulator::{SimulatedCamera, SimulatedPir, Visitor};
pub use traits::{
    Frame, FrameSource, HardwareTrigger, Indicator, IndicatorPattern, LogOutput, NullOutput,
    OutputSignal,
};
pub use trigger::{trigger_channel, TriggerEvent, TriggerLine, TriggerSource};
