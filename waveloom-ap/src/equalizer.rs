//! Multi-band IIR equalizer plus the replay-gain + preamp application that
//! rides along on the same per-sample pass.

use crate::audio::iir::{BiquadCoeffs, FilterKind, IirFilterChain};
use crate::audio::{AudioFormat, PcmChunk};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type ChunkEqualizedCallback = Box<dyn FnMut(PcmChunk) + Send>;
pub type ReplayGainChangedCallback = Box<dyn FnMut(f64) + Send>;

/// Band-count tables, indexed by gain count (clamped to 3..=10). Mirrors the
/// fixed center-frequency tables used to build the cascade from a user's
/// per-band gain sliders.
pub(crate) fn center_frequencies_for(band_count: usize) -> &'static [f64] {
    match band_count.clamp(3, 10) {
        3 => &[62.0, 750.0, 5000.0],
        4 => &[62.0, 500.0, 2500.0, 7500.0],
        5 => &[62.0, 250.0, 750.0, 2500.0, 7500.0],
        6 => &[31.0, 62.0, 125.0, 250.0, 2500.0, 7500.0],
        7 => &[31.0, 62.0, 125.0, 250.0, 2500.0, 5000.0, 12500.0],
        8 => &[31.0, 62.0, 125.0, 250.0, 750.0, 2500.0, 5000.0, 12500.0],
        9 => &[31.0, 62.0, 125.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 12500.0],
        _ => &[31.0, 62.0, 125.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 16000.0],
    }
}

/// Converts an RBJ octave bandwidth to/from a Hz bandwidth straddling the
/// center frequency, so adjacent bands' skirts can be laid out in the same
/// "meet in the middle" way as a Hz-domain design, then fed to our
/// octave-parameterized biquad formulas.
fn hz_bandwidth_to_octaves(width_hz: f64, center_freq: f64) -> f64 {
    if center_freq <= 0.0 || width_hz <= 0.0 {
        return 1.0;
    }
    let ratio = width_hz / center_freq;
    let x = (ratio + (ratio * ratio + 4.0).sqrt()) / 2.0;
    2.0 * x.log2()
}

/// Builds band (center, bandwidth-in-Hz) pairs so that each band's skirt
/// meets the previous band's, then converts each to an octave bandwidth.
fn build_bands(center_freqs: &[f64]) -> Vec<(f64, f64)> {
    let mut bands = Vec::with_capacity(center_freqs.len());
    bands.push((center_freqs[0], center_freqs[0] / 2.0));
    let mut previous_high = center_freqs[0] * 1.25;
    for &center in &center_freqs[1..] {
        let bandwidth_hz = (center - previous_high) * 2.0;
        bands.push((center, bandwidth_hz.max(1.0)));
        previous_high = center + bandwidth_hz / 2.0;
    }
    bands
}

struct GainState {
    target_db: f64,
    current_db: f64,
    pre_amp_db: f64,
}

impl GainState {
    /// Advances `current_db` toward `target_db` by at most 3 dB/s, snapping
    /// once within 0.05 dB. Returns the new value if it moved.
    fn advance(&mut self, sample_rate: u32) -> Option<f64> {
        let diff = self.target_db - self.current_db;
        if diff.abs() < 0.05 {
            if self.current_db != self.target_db {
                self.current_db = self.target_db;
                return Some(self.current_db);
            }
            return None;
        }
        let change_per_sample = diff.abs().min(3.0) / sample_rate.max(1) as f64;
        self.current_db += change_per_sample * diff.signum();
        Some(self.current_db)
    }
}

struct Options {
    on: bool,
    wide_stereo_delay_frames: usize,
    soft_clip: bool,
}

/// Applies the current multi-band EQ (or, when off, just gain/optional
/// delay/clip) and the smoothed replay-gain correction to equalized chunks.
pub struct Equalizer {
    format: AudioFormat,
    sample_rate: u32,
    options: Mutex<Options>,
    chain: Mutex<Option<IirFilterChain>>,
    gain: Arc<Mutex<GainState>>,
    delay_line: Mutex<VecDeque<u8>>,
    on_chunk_equalized: Mutex<Option<ChunkEqualizedCallback>>,
    on_replay_gain_changed: Arc<Mutex<Option<ReplayGainChangedCallback>>>,
    has_bands: AtomicBool,
}

impl Equalizer {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            sample_rate: format.sample_rate,
            options: Mutex::new(Options {
                on: true,
                wide_stereo_delay_frames: 0,
                soft_clip: false,
            }),
            chain: Mutex::new(None),
            gain: Arc::new(Mutex::new(GainState {
                target_db: 0.0,
                current_db: 0.0,
                pre_amp_db: 0.0,
            })),
            delay_line: Mutex::new(VecDeque::new()),
            on_chunk_equalized: Mutex::new(None),
            on_replay_gain_changed: Arc::new(Mutex::new(None)),
            has_bands: AtomicBool::new(false),
        }
    }

    pub fn set_on_chunk_equalized(&self, cb: ChunkEqualizedCallback) {
        *self.on_chunk_equalized.lock() = Some(cb);
    }

    pub fn set_on_replay_gain_changed(&self, cb: ReplayGainChangedCallback) {
        *self.on_replay_gain_changed.lock() = Some(cb);
    }

    pub fn set_wide_stereo_delay_ms(&self, ms: f64) {
        let frames = self.format.frames_for_duration((ms * 1000.0) as i64).max(0) as usize;
        let width = self.format.sample_type.byte_width();
        let mut options = self.options.lock();
        options.wide_stereo_delay_frames = frames;
        let mut delay_line = self.delay_line.lock();
        delay_line.clear();
        delay_line.resize(frames * width, 0);
    }

    pub fn set_soft_clip(&self, enabled: bool) {
        self.options.lock().soft_clip = enabled;
    }

    /// Rebuilds the filter chain from 3-10 per-band gains. `gains.len() < 3`
    /// is treated as 3 bands (the remaining bands' gain defaults to 0 dB).
    pub fn set_gains(&self, on: bool, gains: &[f64], pre_amp_db: f64) {
        let band_count = gains.len().clamp(3, 10);
        let center_freqs = center_frequencies_for(band_count);
        let bands = build_bands(center_freqs);

        let mut coeffs = Vec::with_capacity(bands.len());
        for (i, (center, bandwidth_hz)) in bands.iter().enumerate() {
            let kind = if i == 0 {
                FilterKind::LowShelf
            } else if i == bands.len() - 1 {
                FilterKind::HighShelf
            } else {
                FilterKind::BandShelf
            };
            let gain_db = gains.get(i).copied().unwrap_or(0.0);
            let bandwidth_octaves = hz_bandwidth_to_octaves(*bandwidth_hz, *center);
            coeffs.push(BiquadCoeffs::for_kind(kind, *center, bandwidth_octaves, self.sample_rate as f64, gain_db));
        }

        let mut chain = IirFilterChain::new(&coeffs, self.format.channel_count as usize);
        let gain = Arc::clone(&self.gain);
        let on_changed = Arc::clone(&self.on_replay_gain_changed);
        let sample_rate = self.sample_rate;
        chain.set_callback_raw(Box::new(move |value, channel_index| {
            apply_gain(value, channel_index, &gain, sample_rate, &on_changed);
        }));

        *self.chain.lock() = Some(chain);
        self.has_bands.store(true, Ordering::SeqCst);
        self.gain.lock().pre_amp_db = pre_amp_db;

        self.options.lock().on = on;
    }

    pub fn set_replay_gain(&self, replay_gain_db: f64) {
        self.gain.lock().target_db = replay_gain_db;
    }

    /// Resets `current_replay_gain` to the target with no ramp, used at the
    /// start of a track so the first samples are not faded in from 0 dB.
    pub fn play_begins(&self) {
        let mut gain = self.gain.lock();
        gain.current_db = gain.target_db;
    }

    pub fn request_replay_gain_info(&self) {
        let current = self.gain.lock().current_db;
        if let Some(cb) = self.on_replay_gain_changed.lock().as_mut() {
            cb(current);
        }
    }

    /// Processes up to `max_chunks` queued chunks in place and emits each via
    /// `chunk_equalized`. The caller owns the actual queue; this just takes
    /// ownership of the chunks handed to it.
    pub fn chunk_available(&self, chunks: Vec<PcmChunk>) {
        for mut chunk in chunks {
            let on = self.options.lock().on && self.has_bands.load(Ordering::SeqCst);
            if on {
                if let Some(chain) = self.chain.lock().as_mut() {
                    chain.process_pcm_data(&mut chunk.data, self.format.sample_type);
                }
            } else {
                self.process_bypass(&mut chunk.data);
            }

            if let Some(cb) = self.on_chunk_equalized.lock().as_mut() {
                cb(chunk);
            }
        }
    }

    fn process_bypass(&self, data: &mut [u8]) {
        let sample_type = self.format.sample_type;
        let width = sample_type.byte_width();
        let channel_count = self.format.channel_count as usize;
        if channel_count == 0 || data.len() % width != 0 {
            return;
        }
        let frame_count = data.len() / width / channel_count;
        let (soft_clip, delay_frames) = {
            let options = self.options.lock();
            (options.soft_clip, options.wide_stereo_delay_frames)
        };
        let sample_rate = self.sample_rate;

        for frame in 0..frame_count {
            for ch in 0..channel_count {
                let offset = (frame * channel_count + ch) * width;
                let slice = &mut data[offset..offset + width];
                let mut value = crate::audio::iir::decode_sample(slice, sample_type);

                apply_gain(&mut value, ch, &self.gain, sample_rate, &self.on_replay_gain_changed);

                if soft_clip {
                    value = soft_clip_sample(value, i16::MAX as f64);
                }

                crate::audio::iir::encode_sample(slice, value, sample_type);
            }
        }

        if delay_frames > 0 && channel_count > 1 {
            apply_wide_stereo_delay(data, self.format, delay_frames, &mut self.delay_line.lock());
        }
    }
}

/// Shared by the in-chain raw callback (EQ on) and the bypass loop (EQ off):
/// ramps `current_db` toward the analyzer's latest reading and multiplies
/// `value` by the resulting linear gain (plus preamp).
fn apply_gain(
    value: &mut f64,
    channel_index: usize,
    gain: &Arc<Mutex<GainState>>,
    sample_rate: u32,
    on_changed: &Arc<Mutex<Option<ReplayGainChangedCallback>>>,
) {
    let (current_db, pre_amp_db) = {
        let mut state = gain.lock();
        if channel_index == 0 {
            if let Some(new_value) = state.advance(sample_rate) {
                if let Some(cb) = on_changed.lock().as_mut() {
                    cb(new_value);
                }
            }
        }
        (state.current_db, state.pre_amp_db)
    };
    *value *= 10f64.powf((current_db + pre_amp_db) / 20.0);
}

fn soft_clip_sample(value: f64, ceiling: f64) -> f64 {
    ceiling * (value / ceiling).tanh()
}

fn apply_wide_stereo_delay(data: &mut [u8], format: AudioFormat, delay_frames: usize, delay_line: &mut VecDeque<u8>) {
    let width = format.sample_type.byte_width();
    let bytes_per_frame = format.bytes_per_frame();
    if delay_line.len() != delay_frames * width {
        delay_line.clear();
        delay_line.resize(delay_frames * width, 0);
    }
    let frame_count = data.len() / bytes_per_frame.max(1);
    for frame in 0..frame_count {
        let offset = frame * bytes_per_frame + width; // channel index 1
        if offset + width > data.len() {
            break;
        }
        delay_line.extend(data[offset..offset + width].iter().copied());
        let delayed: Vec<u8> = delay_line.drain(..width).collect();
        data[offset..offset + width].copy_from_slice(&delayed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleType;

    fn test_format() -> AudioFormat {
        AudioFormat {
            sample_rate: 44_100,
            channel_count: 2,
            sample_type: SampleType::I16,
        }
    }

    #[test]
    fn set_gains_clamps_band_count_and_builds_chain() {
        let eq = Equalizer::new(test_format());
        eq.set_gains(true, &[0.0, 1.0], 0.0);
        assert!(eq.has_bands.load(Ordering::SeqCst));
    }

    #[test]
    fn play_begins_snaps_current_to_target() {
        let eq = Equalizer::new(test_format());
        eq.set_replay_gain(-6.0);
        eq.play_begins();
        assert_eq!(eq.gain.lock().current_db, -6.0);
    }

    #[test]
    fn gain_ramps_toward_target_gradually() {
        let eq = Equalizer::new(test_format());
        eq.set_replay_gain(-6.0);
        let mut g = eq.gain.lock();
        let before = g.current_db;
        g.advance(44_100);
        assert!(g.current_db < before);
        assert!(g.current_db > -6.0);
    }

    #[test]
    fn zero_gain_produces_unity_factor() {
        let mut value = 1000.0;
        let gain = Arc::new(Mutex::new(GainState {
            target_db: 0.0,
            current_db: 0.0,
            pre_amp_db: 0.0,
        }));
        let cb = Arc::new(Mutex::new(None));
        apply_gain(&mut value, 0, &gain, 44_100, &cb);
        assert!((value - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn soft_clip_saturates_but_preserves_sign() {
        let clipped = soft_clip_sample(100_000.0, i16::MAX as f64);
        assert!(clipped > 0.0 && clipped < i16::MAX as f64 * 1.01);
        let clipped_negative = soft_clip_sample(-100_000.0, i16::MAX as f64);
        assert!(clipped_negative < 0.0);
    }

    #[test]
    fn hz_bandwidth_to_octaves_is_positive_and_finite() {
        let octaves = hz_bandwidth_to_octaves(500.0, 750.0);
        assert!(octaves.is_finite() && octaves > 0.0);
    }

    #[test]
    fn center_frequencies_table_has_expected_band_counts() {
        for n in 3..=10 {
            assert_eq!(center_frequencies_for(n).len(), n);
        }
        assert_eq!(center_frequencies_for(2).len(), 3);
        assert_eq!(center_frequencies_for(20).len(), 10);
    }
}
