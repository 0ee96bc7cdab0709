//! Native audio for the capability providers
//!
//! `CpalMicrophone` and `CpalPlayback` implement the provider's audio traits
//! on the default devices (feature `audio-io`). `NullOutput` discards audio
//! for text-only mounts.

#[cfg(feature = "audio-io")]
pub mod microphone;
#[cfg(feature = "audio-io")]
pub mod playback;
pub mod queue;
pub mod resample;

#[cfg(feature = "audio-io")]
pub use microphone::CpalMicrophone;
#[cfg(feature = "audio-io")]
pub use playback::CpalPlayback;
pub use queue::PlaybackQueue;
pub use resample::StreamResampler;

use crate::provider::AudioOutput;
use crate::Result;

/// Sample rate of assistant audio delivered by the providers
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Average interleaved channels into mono
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Output that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn play(&self, _samples: &[f32]) -> Result<()> {
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        Ok(())
    }

    fn release(&self) -> Result<()> {
        Ok(())
    }
}
