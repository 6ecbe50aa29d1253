//! Sample-rate conversion using rubato, reused across a whole track so
//! filter state (and therefore phase) stays continuous between chunks.

use crate::error::{DecodeError, Result};
use rubato::{FastFixedIn, Resampler as RubatoResampler};
use tracing::debug;

/// Resamples interleaved `f32` PCM, maintaining filter state across calls.
pub enum StatefulResampler {
    PassThrough,
    Active {
        resampler: FastFixedIn<f32>,
        channels: u16,
    },
}

impl StatefulResampler {
    pub fn new(input_rate: u32, output_rate: u32, channels: u16, chunk_size: usize) -> Result<Self> {
        if input_rate == output_rate {
            return Ok(Self::PassThrough);
        }

        debug!(input_rate, output_rate, channels, "building resampler");
        let resampler = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            rubato::PolynomialDegree::Septic,
            chunk_size.max(1),
            channels as usize,
        )
        .map_err(|e| DecodeError::NetworkError {
            reason: format!("failed to build resampler: {e}"),
        })?;

        Ok(Self::Active { resampler, channels })
    }

    pub fn process_chunk(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        match self {
            Self::PassThrough => Ok(input.to_vec()),
            Self::Active { resampler, channels } => {
                let planar_input = deinterleave(input, *channels);
                let planar_output = resampler
                    .process(&planar_input, None)
                    .map_err(|e| DecodeError::NetworkError {
                        reason: format!("resample failed: {e}"),
                    })?;
                Ok(interleave(planar_output))
            }
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::PassThrough)
    }
}

fn deinterleave(samples: &[f32], channels: u16) -> Vec<Vec<f32>> {
    let num_channels = channels as usize;
    let num_frames = samples.len() / num_channels.max(1);
    let mut planar = vec![Vec::with_capacity(num_frames); num_channels];
    for frame_idx in 0..num_frames {
        for ch_idx in 0..num_channels {
            planar[ch_idx].push(samples[frame_idx * num_channels + ch_idx]);
        }
    }
    planar
}

fn interleave(planar: Vec<Vec<f32>>) -> Vec<f32> {
    if planar.is_empty() {
        return Vec::new();
    }
    let num_channels = planar.len();
    let num_frames = planar[0].len();
    let mut out = Vec::with_capacity(num_frames * num_channels);
    for frame_idx in 0..num_frames {
        for ch_idx in 0..num_channels {
            out.push(planar[ch_idx][frame_idx]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_rate_is_pass_through() {
        let r = StatefulResampler::new(44_100, 44_100, 2, 512).unwrap();
        assert!(r.is_pass_through());
    }

    #[test]
    fn deinterleave_then_interleave_round_trips() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let planar = deinterleave(&samples, 2);
        assert_eq!(interleave(planar), samples);
    }

    #[test]
    fn downsampling_shrinks_frame_count() {
        let mut r = StatefulResampler::new(48_000, 44_100, 2, 1000).unwrap();
        let input = vec![0.1f32; 2000];
        let output = r.process_chunk(&input).unwrap();
        let out_frames = output.len() / 2;
        let expected = (1000.0 * 44_100.0 / 48_000.0) as usize;
        assert!(out_frames >= expected.saturating_sub(50) && out_frames <= expected + 50);
    }
}
