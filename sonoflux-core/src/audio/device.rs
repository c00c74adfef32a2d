//! Input device selection.
//!
//! Pure decision logic over an enumerated device list, so the rules are
//! testable without an audio host: honor an explicit index when it
//! points at a usable input device, clamp the requested channel count to
//! the device maximum with a warning, and fall back to the system
//! default device when configured to.

use tracing::{info, warn};

use super::DeviceInfo;
use crate::config::InputConfig;
use crate::error::{EngineError, Result};

/// Resolve the configured device against `devices`, returning the
/// selected device and the (possibly clamped) channel count.
pub fn select_input_device(
    devices: &[DeviceInfo],
    input: &InputConfig,
) -> Result<(DeviceInfo, u16)> {
    let mut requested = input.device;
    if requested >= devices.len() as i32 {
        requested = -1;
    }

    if requested >= 0 {
        let device = &devices[requested as usize];
        if device.max_input_channels > 0 {
            let channels = clamp_channels(input.channels, device);
            return Ok((device.clone(), channels));
        }
        // Not an input-capable device; only the default fallback is left.
        if !input.use_default {
            return Err(EngineError::NoInputDevice {
                index: input.device,
                use_default: input.use_default,
            });
        }
        requested = -1;
    }

    if requested == -1 && input.use_default {
        if let Some(device) = devices.iter().find(|d| d.is_default && d.max_input_channels > 0) {
            let channels = clamp_channels(input.channels, device);
            return Ok((device.clone(), channels));
        }
    }

    Err(EngineError::NoInputDevice {
        index: input.device,
        use_default: input.use_default,
    })
}

fn clamp_channels(requested: u16, device: &DeviceInfo) -> u16 {
    if requested > device.max_input_channels {
        warn!(
            device = %device.name,
            requested,
            available = device.max_input_channels,
            "requested more channels than the device supports, clamping"
        );
        device.max_input_channels
    } else {
        requested
    }
}

/// Log the selected device the way operators expect to see it.
pub fn log_input_device(device: &DeviceInfo) {
    info!(
        name = %device.name,
        index = device.index,
        max_input_channels = device.max_input_channels,
        default_sample_rate = device.default_sample_rate,
        is_default = device.is_default,
        "input device selected"
    );
}
