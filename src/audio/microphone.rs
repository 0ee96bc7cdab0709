//! Microphone capture on the default input device
//!
//! The cpal stream lives on its own thread. Captured audio is downmixed,
//! resampled to the capture rate and handed to the provider as frames.

use super::downmix;
use super::resample::StreamResampler;
use crate::provider::{AudioFrame, MicrophoneSource, CAPTURE_SAMPLE_RATE};
use crate::{ConciergeError, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, Stream, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Capture thread owning the (non-Send) cpal stream
struct Capture {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Default input device, captured as mono frames at the provider rate
pub struct CpalMicrophone {
    target_rate: u32,
    frame_capacity: usize,
    capture: Mutex<Option<Capture>>,
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            target_rate: CAPTURE_SAMPLE_RATE,
            frame_capacity: 64,
            capture: Mutex::new(None),
        }
    }

    pub fn with_target_rate(mut self, rate: u32) -> Self {
        self.target_rate = rate;
        self
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.lock().is_some()
    }
}

fn default_input() -> Result<(Device, StreamConfig)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| ConciergeError::UnsupportedEnvironment("No input device available".into()))?;

    let config = device
        .default_input_config()
        .map_err(|e| {
            ConciergeError::UnsupportedEnvironment(format!("Failed to get input config: {}", e))
        })?
        .into();
    Ok((device, config))
}

fn map_build_error(e: BuildStreamError) -> ConciergeError {
    match e {
        BuildStreamError::DeviceNotAvailable => {
            ConciergeError::UnsupportedEnvironment("Input device disappeared".into())
        }
        BuildStreamError::BackendSpecific { err } => {
            ConciergeError::PermissionDenied(format!("Input stream refused: {}", err))
        }
        other => ConciergeError::ProviderInitFailed(format!("Failed to build input stream: {}", other)),
    }
}

fn open_input_stream(target_rate: u32, frame_tx: mpsc::Sender<AudioFrame>) -> Result<Stream> {
    let (device, config) = default_input()?;
    info!(
        "Using input device: {} ({} Hz, {} ch)",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        config.sample_rate.0,
        config.channels
    );

    let channels = config.channels as usize;
    let mut resampler = StreamResampler::new(config.sample_rate.0, target_rate)?;

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = downmix(data, channels);
                match resampler.process(&mono) {
                    Ok(frame) if !frame.is_empty() => {
                        if let Err(e) = frame_tx.try_send(frame) {
                            debug!("Dropping capture frame: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Capture resampling failed: {}", e),
                }
            },
            |err| error!("Audio input stream error: {}", err),
            None,
        )
        .map_err(map_build_error)?;

    stream.play().map_err(|e| {
        ConciergeError::ProviderInitFailed(format!("Failed to start input stream: {}", e))
    })?;
    Ok(stream)
}

#[async_trait]
impl MicrophoneSource for CpalMicrophone {
    fn check_access(&self) -> Result<()> {
        default_input().map(|_| ())
    }

    async fn acquire(&self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.is_capturing() {
            warn!("Microphone already acquired, restarting capture");
            self.release()?;
        }

        let (frame_tx, frame_rx) = mpsc::channel(self.frame_capacity);
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let target_rate = self.target_rate;

        let handle = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let stream = match open_input_stream(target_rate, frame_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Park until release (or the microphone is dropped)
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Capture thread exiting");
            })
            .map_err(|e| ConciergeError::ProviderInitFailed(format!("Failed to spawn capture thread: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                *self.capture.lock() = Some(Capture { stop_tx, handle });
                info!("Microphone capture started");
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(ConciergeError::ProviderInitFailed(
                "Capture thread exited before the stream opened".into(),
            )),
        }
    }

    fn release(&self) -> Result<()> {
        let Some(capture) = self.capture.lock().take() else {
            return Ok(());
        };
        let _ = capture.stop_tx.send(());
        capture
            .handle
            .join()
            .map_err(|_| ConciergeError::ProviderRuntimeError("Capture thread panicked".into()))?;
        info!("Microphone released");
        Ok(())
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
