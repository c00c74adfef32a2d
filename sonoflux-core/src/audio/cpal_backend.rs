//! cpal implementation of the audio backend seam.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig};
use tracing::{error, info, warn};

use super::{AudioBackend, DeviceInfo, InputStream, SampleCallback, StreamParams};
use crate::error::{EngineError, Result};

// The host handle is fetched per call rather than stored: `cpal::Host`
// is not guaranteed `Send + Sync` on every platform, and the backend
// must be shareable across the engine's tasks.
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    fn device_at(index: usize) -> Result<cpal::Device> {
        let mut devices = cpal::default_host()
            .input_devices()
            .map_err(|e| EngineError::AudioDevices(e.to_string()))?;
        devices
            .nth(index)
            .ok_or_else(|| EngineError::AudioDevices(format!("device index {index} out of range")))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_input_device().and_then(|d| d.name().ok());

        let devices = host
            .input_devices()
            .map_err(|e| EngineError::AudioDevices(e.to_string()))?;

        let mut out = Vec::new();
        for (index, device) in devices.enumerate() {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Input Device {}", index + 1));

            let max_input_channels = device
                .supported_input_configs()
                .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
                .unwrap_or(0);

            let default_sample_rate = device
                .default_input_config()
                .map(|c| c.sample_rate().0 as f64)
                .unwrap_or(0.0);

            out.push(DeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                max_input_channels,
                default_sample_rate,
            });
        }
        Ok(out)
    }

    fn open_stream(
        &self,
        params: &StreamParams,
        mut callback: SampleCallback,
    ) -> Result<Box<dyn InputStream>> {
        let device = Self::device_at(params.device_index)?;

        let supported = device
            .default_input_config()
            .map_err(|e| EngineError::AudioStream(e.to_string()))?;

        let config = StreamConfig {
            channels: params.channels,
            sample_rate: SampleRate(params.sample_rate as u32),
            buffer_size: BufferSize::Fixed(params.frames_per_buffer as u32),
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate = params.sample_rate,
            frames_per_buffer = params.frames_per_buffer,
            channels = params.channels,
            format = ?supported.sample_format(),
            low_latency = params.low_latency,
            "opening input stream"
        );

        let err_fn = |err| error!("audio stream error: {err}");

        let stream = match supported.sample_format() {
            SampleFormat::I32 => device.build_input_stream(
                &config,
                move |data: &[i32], _info| callback(data),
                err_fn,
                None,
            ),

            SampleFormat::I16 => {
                // Widen to the 24-in-32 layout without allocating per
                // callback.
                let mut conv: Vec<i32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        conv.resize(data.len(), 0);
                        for (dst, &s) in conv.iter_mut().zip(data) {
                            *dst = (s as i32) << 16;
                        }
                        callback(&conv);
                    },
                    err_fn,
                    None,
                )
            }

            SampleFormat::F32 => {
                let mut conv: Vec<i32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        conv.resize(data.len(), 0);
                        for (dst, &s) in conv.iter_mut().zip(data) {
                            *dst = (s.clamp(-1.0, 1.0) as f64 * i32::MAX as f64) as i32;
                        }
                        callback(&conv);
                    },
                    err_fn,
                    None,
                )
            }

            fmt => {
                return Err(EngineError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| EngineError::AudioStream(e.to_string()))?;

        Ok(Box::new(CpalStream {
            stream: Some(stream),
        }))
    }
}

struct CpalStream {
    stream: Option<cpal::Stream>,
}

impl InputStream for CpalStream {
    fn start(&mut self) -> Result<()> {
        match &self.stream {
            Some(stream) => stream
                .play()
                .map_err(|e| EngineError::AudioStream(e.to_string())),
            None => Err(EngineError::AudioStream("stream already closed".into())),
        }
    }

    fn stop(&mut self) -> Result<()> {
        match &self.stream {
            Some(stream) => stream
                .pause()
                .map_err(|e| EngineError::AudioStream(e.to_string())),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.stream.take().is_none() {
            warn!("input stream closed twice");
        }
        Ok(())
    }
}
