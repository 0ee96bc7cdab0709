//! Sample rate conversion for capture and playback

use crate::{ConciergeError, Result};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

/// Frames fed to the sinc resampler per call
const CHUNK_FRAMES: usize = 1024;

/// Mono streaming resampler
///
/// Device callbacks deliver arbitrary buffer sizes, so input is accumulated
/// until a full resampler chunk is available. Leftover samples carry over to
/// the next call instead of being zero-padded.
pub struct StreamResampler {
    resampler: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
    input_rate: u32,
    output_rate: u32,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 {
            return Err(ConciergeError::Config(
                "Sample rates must be greater than 0".into(),
            ));
        }

        let resampler = if input_rate == output_rate {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            let ratio = output_rate as f64 / input_rate as f64;
            let resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_FRAMES, 1)
                .map_err(|e| ConciergeError::Config(format!("Failed to create resampler: {}", e)))?;
            Some(resampler)
        };

        debug!("Stream resampler {} Hz -> {} Hz", input_rate, output_rate);
        Ok(Self {
            resampler,
            pending: Vec::with_capacity(CHUNK_FRAMES * 2),
            input_rate,
            output_rate,
        })
    }

    /// Resample as much of the accumulated input as possible
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(input.to_vec());
        };

        self.pending.extend_from_slice(input);
        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = vec![self.pending.drain(..needed).collect()];
            let resampled = resampler
                .process(&chunk, None)
                .map_err(|e| ConciergeError::ProviderRuntimeError(format!("Resampling failed: {}", e)))?;
            if let Some(channel) = resampled.first() {
                output.extend_from_slice(channel);
            }
        }
        Ok(output)
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}
