//! Cascaded biquad IIR filtering with per-sample raw/filtered hooks.
//!
//! Used by the replay-gain calculator's weighting cascade and by the
//! equalizer's multi-band cascade. Processing happens in `f64` space;
//! non-i16 sample types are scaled into the i16 range and back so callbacks
//! always see a consistent magnitude.

use super::format::SampleType;
use std::f64::consts::PI;

/// Normalized biquad coefficients (already divided by `a0`), matching the
/// "Transposed Direct Form II" update used throughout this codebase's DSP.
#[derive(Debug, Clone, Copy, Default)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

/// Filter shapes the equalizer composes into a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    LowShelf,
    BandShelf,
    HighShelf,
}

impl BiquadCoeffs {
    pub fn bypass() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// RBJ-style low shelf, parameterized by bandwidth in octaves rather
    /// than Q (matching how the equalizer derives adjacent-band overlap).
    pub fn low_shelf(center_freq: f64, bandwidth_octaves: f64, sample_rate: f64, gain_db: f64) -> Self {
        shelf_coeffs(center_freq, bandwidth_octaves, sample_rate, gain_db, true)
    }

    pub fn high_shelf(center_freq: f64, bandwidth_octaves: f64, sample_rate: f64, gain_db: f64) -> Self {
        shelf_coeffs(center_freq, bandwidth_octaves, sample_rate, gain_db, false)
    }

    /// RBJ-style highpass, parameterized by Q rather than bandwidth — used
    /// for the replay-gain cascade's Butterworth stage (`Q = 1/sqrt(2)`).
    pub fn high_pass(cutoff_freq: f64, q: f64, sample_rate: f64) -> Self {
        let omega = 2.0 * PI * cutoff_freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega / (2.0 * q);

        let b0 = (1.0 + cos_omega) / 2.0;
        let b1 = -(1.0 + cos_omega);
        let b2 = (1.0 + cos_omega) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// RBJ peaking/band-shelf filter.
    pub fn band_shelf(center_freq: f64, bandwidth_octaves: f64, sample_rate: f64, gain_db: f64) -> Self {
        let a = 10f64.powf(gain_db / 40.0);
        let omega = 2.0 * PI * center_freq / sample_rate;
        let sin_omega = omega.sin();
        let cos_omega = omega.cos();
        let alpha = sin_omega * (2f64.ln() / 2.0 * bandwidth_octaves * omega / sin_omega).sinh();

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_omega;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_omega;
        let a2 = 1.0 - alpha / a;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Dispatch on [`FilterKind`] — what [`crate::equalizer`] calls when it
    /// rebuilds the chain from a band-center-frequency table.
    pub fn for_kind(kind: FilterKind, center_freq: f64, bandwidth_octaves: f64, sample_rate: f64, gain_db: f64) -> Self {
        match kind {
            FilterKind::LowShelf => Self::low_shelf(center_freq, bandwidth_octaves, sample_rate, gain_db),
            FilterKind::HighShelf => Self::high_shelf(center_freq, bandwidth_octaves, sample_rate, gain_db),
            FilterKind::BandShelf => Self::band_shelf(center_freq, bandwidth_octaves, sample_rate, gain_db),
        }
    }
}

fn shelf_coeffs(center_freq: f64, bandwidth_octaves: f64, sample_rate: f64, gain_db: f64, low: bool) -> BiquadCoeffs {
    let a = 10f64.powf(gain_db / 40.0);
    let omega = 2.0 * PI * center_freq / sample_rate;
    let sin_omega = omega.sin();
    let cos_omega = omega.cos();
    // Shelf slope S=1 equivalent expressed via bandwidth in octaves, matching
    // the rest of the chain's octave-based band spacing.
    let alpha = sin_omega / 2.0 * ((2f64.ln() / 2.0 * bandwidth_octaves * omega / sin_omega).sinh());
    let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

    let (b0, b1, b2, a0, a1, a2) = if low {
        (
            a * ((a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos_omega),
            a * ((a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos_omega),
            (a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha,
        )
    } else {
        (
            a * ((a + 1.0) + (a - 1.0) * cos_omega + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_omega),
            a * ((a + 1.0) + (a - 1.0) * cos_omega - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos_omega + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos_omega),
            (a + 1.0) - (a - 1.0) * cos_omega - two_sqrt_a_alpha,
        )
    };

    BiquadCoeffs {
        b0: b0 / a0,
        b1: b1 / a0,
        b2: b2 / a0,
        a1: a1 / a0,
        a2: a2 / a0,
    }
}

/// One biquad section in Transposed Direct Form II.
#[derive(Debug, Clone)]
struct Biquad {
    coeffs: BiquadCoeffs,
    z1: f64,
    z2: f64,
}

impl Biquad {
    fn new(coeffs: BiquadCoeffs) -> Self {
        Self { coeffs, z1: 0.0, z2: 0.0 }
    }

    #[inline(always)]
    fn process(&mut self, input: f64) -> f64 {
        let output = self.coeffs.b0 * input + self.z1;
        self.z1 = self.coeffs.b1 * input - self.coeffs.a1 * output + self.z2;
        self.z2 = self.coeffs.b2 * input - self.coeffs.a2 * output;
        output
    }
}

type SampleCallback = Box<dyn FnMut(&mut f64, usize) + Send>;

/// A cascade of biquad sections applied, in order, to every channel of
/// interleaved PCM, with optional per-sample hooks invoked before and after
/// filtering.
pub struct IirFilterChain {
    /// One cascade per channel so each channel's filter state is independent.
    sections: Vec<Vec<Biquad>>,
    channel_count: usize,
    on_raw: Option<SampleCallback>,
    on_filtered: Option<SampleCallback>,
}

impl IirFilterChain {
    /// Build a chain from an ordered list of coefficient sets, replicated
    /// per channel so each channel gets independent filter state.
    pub fn new(coeffs: &[BiquadCoeffs], channel_count: usize) -> Self {
        let sections = (0..channel_count)
            .map(|_| coeffs.iter().map(|c| Biquad::new(*c)).collect())
            .collect();
        Self {
            sections,
            channel_count,
            on_raw: None,
            on_filtered: None,
        }
    }

    /// An empty chain (identity passthrough) — still invokes callbacks.
    pub fn passthrough(channel_count: usize) -> Self {
        Self::new(&[], channel_count)
    }

    pub fn set_callback_raw(&mut self, cb: SampleCallback) {
        self.on_raw = Some(cb);
    }

    pub fn set_callback_filtered(&mut self, cb: SampleCallback) {
        self.on_filtered = Some(cb);
    }

    /// Process interleaved PCM in place. `sample_type` determines how raw
    /// bytes are decoded into `f64` and re-encoded after filtering; values
    /// outside the i16 range are scaled into it and back so callbacks always
    /// observe i16-normalized magnitude.
    pub fn process_pcm_data(&mut self, data: &mut [u8], sample_type: SampleType) {
        let width = sample_type.byte_width();
        if data.len() % width != 0 {
            return;
        }
        let frame_count = data.len() / width / self.channel_count.max(1);

        for frame in 0..frame_count {
            for ch in 0..self.channel_count {
                let offset = (frame * self.channel_count + ch) * width;
                let slice = &mut data[offset..offset + width];

                let mut value = decode_sample(slice, sample_type);
                if let Some(cb) = self.on_raw.as_mut() {
                    cb(&mut value, ch);
                }

                let mut filtered = value;
                for section in self.sections[ch].iter_mut() {
                    filtered = section.process(filtered);
                }

                if let Some(cb) = self.on_filtered.as_mut() {
                    cb(&mut filtered, ch);
                }

                encode_sample(slice, filtered, sample_type);
            }
        }
    }
}

pub(crate) fn decode_sample(bytes: &[u8], sample_type: SampleType) -> f64 {
    match sample_type {
        SampleType::I8 => bytes[0] as i8 as f64 * 257.0, // scale to i16 range
        SampleType::U8 => (bytes[0] as i32 - 128) as f64 * 257.0,
        SampleType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        SampleType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as i32 as f64 - 32768.0,
        SampleType::I32 => (i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64) / 65536.0,
        SampleType::U32 => {
            let v = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64 - (i32::MAX as i64 + 1);
            v as f64 / 65536.0
        }
        SampleType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64 * 32768.0,
    }
}

pub(crate) fn encode_sample(bytes: &mut [u8], value: f64, sample_type: SampleType) {
    match sample_type {
        SampleType::I8 => bytes[0] = ((value / 257.0).clamp(-128.0, 127.0)) as i8 as u8,
        SampleType::U8 => bytes[0] = ((value / 257.0 + 128.0).clamp(0.0, 255.0)) as u8,
        SampleType::I16 => {
            let v = value.clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            bytes.copy_from_slice(&v.to_le_bytes());
        }
        SampleType::U16 => {
            let v = (value + 32768.0).clamp(0.0, u16::MAX as f64) as u16;
            bytes.copy_from_slice(&v.to_le_bytes());
        }
        SampleType::I32 => {
            let v = (value * 65536.0).clamp(i32::MIN as f64, i32::MAX as f64) as i32;
            bytes.copy_from_slice(&v.to_le_bytes());
        }
        SampleType::U32 => {
            let v = (value * 65536.0 + (i32::MAX as f64 + 1.0)).clamp(0.0, u32::MAX as f64) as u32;
            bytes.copy_from_slice(&v.to_le_bytes());
        }
        SampleType::F32 => {
            let v = (value / 32768.0) as f32;
            bytes.copy_from_slice(&v.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_chain_preserves_i16_samples() {
        let mut chain = IirFilterChain::passthrough(2);
        let mut data: Vec<u8> = vec![];
        for v in [100i16, -200, 300, -400] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let before = data.clone();
        chain.process_pcm_data(&mut data, SampleType::I16);
        assert_eq!(data, before);
    }

    #[test]
    fn raw_callback_sees_value_before_filtered_callback() {
        let mut chain = IirFilterChain::new(&[BiquadCoeffs::bypass()], 1);
        chain.set_callback_raw(Box::new(|v, _ch| *v *= 2.0));
        let mut data = 1000i16.to_le_bytes().to_vec();
        chain.process_pcm_data(&mut data, SampleType::I16);
        let out = i16::from_le_bytes([data[0], data[1]]);
        assert_eq!(out, 2000);
    }

    #[test]
    fn low_shelf_attenuates_at_high_frequency() {
        // A -6dB low shelf at 100Hz should leave a very high "DC-like" tone
        // near-unaffected relative to a tone well above the shelf corner.
        let coeffs = BiquadCoeffs::low_shelf(100.0, 1.0, 44_100.0, -6.0);
        assert!(coeffs.b0.is_finite());
    }
}
