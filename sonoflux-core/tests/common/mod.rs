//! Shared test doubles for integration tests.

use std::sync::Arc;

use parking_lot::Mutex;

use sonoflux_core::audio::{
    AudioBackend, DeviceInfo, InputStream, SampleCallback, StreamParams,
};
use sonoflux_core::error::Result;

type SharedCallback = Arc<Mutex<Option<SampleCallback>>>;

/// Backend whose "audio thread" is the test itself: `fire` invokes the
/// captured callback with whatever buffer the test scripts.
pub struct ScriptedBackend {
    callback: SharedCallback,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            callback: Arc::new(Mutex::new(None)),
        })
    }

    /// Whether a stream has been opened and its callback captured.
    pub fn stream_open(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Deliver one buffer to the hot path, as the audio driver would.
    pub fn fire(&self, samples: &[i32]) {
        if let Some(callback) = self.callback.lock().as_mut() {
            callback(samples);
        }
    }
}

impl AudioBackend for ScriptedBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            index: 0,
            name: "Scripted Input".to_string(),
            max_input_channels: 2,
            default_sample_rate: 44100.0,
            is_default: true,
        }])
    }

    fn open_stream(
        &self,
        _params: &StreamParams,
        callback: SampleCallback,
    ) -> Result<Box<dyn InputStream>> {
        *self.callback.lock() = Some(callback);
        Ok(Box::new(ScriptedStream {
            callback: Arc::clone(&self.callback),
        }))
    }
}

struct ScriptedStream {
    callback: SharedCallback,
}

impl InputStream for ScriptedStream {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        // After close the driver would never call back again.
        self.callback.lock().take();
        Ok(())
    }
}

/// Backend that reports no devices at all.
pub struct EmptyBackend;

impl AudioBackend for EmptyBackend {
    fn devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(Vec::new())
    }

    fn open_stream(
        &self,
        _params: &StreamParams,
        _callback: SampleCallback,
    ) -> Result<Box<dyn InputStream>> {
        unreachable!("no devices, open_stream must never be reached")
    }
}

/// Reserve a localhost port for a server the test will start later.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
