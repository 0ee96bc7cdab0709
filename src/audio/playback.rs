//! Assistant audio playback on the default output device

use super::queue::PlaybackQueue;
use super::resample::StreamResampler;
use super::PLAYBACK_SAMPLE_RATE;
use crate::provider::AudioOutput;
use crate::{ConciergeError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::Stream;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

enum OutputCommand {
    Resume,
    Stop,
}

/// Output thread owning the (non-Send) cpal stream
struct OpenDevice {
    command_tx: Sender<OutputCommand>,
    handle: JoinHandle<()>,
    rate: u32,
}

/// Assistant speech on the default output device
///
/// The device is opened on first playback and closed on release.
pub struct CpalPlayback {
    source_rate: u32,
    queue: PlaybackQueue,
    resampler: Mutex<Option<StreamResampler>>,
    device: Mutex<Option<OpenDevice>>,
}

impl Default for CpalPlayback {
    fn default() -> Self {
        Self::new(PLAYBACK_SAMPLE_RATE)
    }
}

impl CpalPlayback {
    /// Playback for provider audio at `source_rate`
    pub fn new(source_rate: u32) -> Self {
        Self {
            source_rate,
            // Ten seconds of provider audio
            queue: PlaybackQueue::new(source_rate.max(1) as usize * 10),
            resampler: Mutex::new(None),
            device: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        self.device.lock().is_some()
    }

    pub fn queued_samples(&self) -> usize {
        self.queue.len()
    }

    /// Open the output device if needed; returns the device rate
    fn ensure_open(&self) -> Result<u32> {
        let mut device = self.device.lock();
        if let Some(open) = device.as_ref() {
            return Ok(open.rate);
        }

        let (ready_tx, ready_rx) = bounded::<Result<u32>>(1);
        let (command_tx, command_rx) = bounded::<OutputCommand>(8);
        let queue = self.queue.clone();

        let handle = std::thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || run_output(queue, ready_tx, command_rx))
            .map_err(|e| ConciergeError::ProviderRuntimeError(format!("Failed to spawn playback thread: {}", e)))?;

        let rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                return Err(ConciergeError::ProviderRuntimeError(
                    "Playback thread exited before the stream opened".into(),
                ))
            }
        };

        *self.resampler.lock() = Some(StreamResampler::new(self.source_rate, rate)?);
        *device = Some(OpenDevice {
            command_tx,
            handle,
            rate,
        });
        Ok(rate)
    }
}

fn open_output_stream(queue: PlaybackQueue) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| ConciergeError::UnsupportedEnvironment("No output device available".into()))?;

    info!(
        "Using output device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let config: cpal::StreamConfig = device
        .default_output_config()
        .map_err(|e| ConciergeError::UnsupportedEnvironment(format!("Failed to get output config: {}", e)))?
        .into();
    let channels = config.channels as usize;
    let rate = config.sample_rate.0;
    let mut mono = Vec::new();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                mono.resize(frames, 0.0);
                queue.fill(&mut mono);
                for (frame, sample) in data.chunks_mut(channels.max(1)).zip(mono.iter()) {
                    frame.fill(*sample);
                }
            },
            |err| error!("Audio output stream error: {}", err),
            None,
        )
        .map_err(|e| ConciergeError::ProviderRuntimeError(format!("Failed to build output stream: {}", e)))?;

    stream
        .play()
        .map_err(|e| ConciergeError::ProviderRuntimeError(format!("Failed to start output stream: {}", e)))?;
    Ok((stream, rate))
}

fn run_output(queue: PlaybackQueue, ready_tx: Sender<Result<u32>>, command_rx: Receiver<OutputCommand>) {
    let stream = match open_output_stream(queue) {
        Ok((stream, rate)) => {
            let _ = ready_tx.send(Ok(rate));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    while let Ok(command) = command_rx.recv() {
        match command {
            OutputCommand::Resume => {
                if let Err(e) = stream.play() {
                    warn!("Failed to resume output stream: {}", e);
                }
            }
            OutputCommand::Stop => break,
        }
    }
    drop(stream);
    debug!("Playback thread exiting");
}

impl AudioOutput for CpalPlayback {
    fn play(&self, samples: &[f32]) -> Result<()> {
        self.ensure_open()?;
        let resampled = match self.resampler.lock().as_mut() {
            Some(resampler) => resampler.process(samples)?,
            None => samples.to_vec(),
        };
        let dropped = self.queue.push(&resampled);
        if dropped > 0 {
            debug!("Playback queue full, dropped {} samples", dropped);
        }
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        let device = self.device.lock();
        match device.as_ref() {
            Some(open) => open
                .command_tx
                .send(OutputCommand::Resume)
                .map_err(|e| ConciergeError::Channel(format!("Playback thread gone: {}", e))),
            None => Ok(()),
        }
    }

    fn release(&self) -> Result<()> {
        self.queue.clear();
        *self.resampler.lock() = None;
        let Some(device) = self.device.lock().take() else {
            return Ok(());
        };
        let _ = device.command_tx.send(OutputCommand::Stop);
        device
            .handle
            .join()
            .map_err(|_| ConciergeError::ProviderRuntimeError("Playback thread panicked".into()))?;
        info!("Audio output released");
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        let _ = self.release();
    }
}
