//! Runs the replay-gain calculator over decoded PCM on its own thread,
//! publishing an updated estimate every few seconds of audio.

use crate::audio::iir::{BiquadCoeffs, IirFilterChain};
use crate::audio::replaygain::{is_supported_sample_rate, ReplayGainCalculator};
use crate::audio::{AudioFormat, PcmChunk};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Minimum spacing, in stream time, between unsolicited replay-gain updates.
const REPLAY_GAIN_UPDATE_INTERVAL_MICROSECONDS: i64 = 4 * 1_000_000;

pub type ReplayGainCallback = Box<dyn FnMut(f64) + Send>;

struct GainStage {
    chain: IirFilterChain,
    calculator: Arc<Mutex<ReplayGainCalculator>>,
}

/// Measures replay gain as chunks flow past; emits nothing if the format's
/// sample rate has no weighting-filter coefficients.
pub struct Analyzer {
    format: AudioFormat,
    stage: Mutex<Option<GainStage>>,
    decoder_finished: AtomicBool,
    result_last_calculated_us: AtomicI64,
    on_replay_gain: Mutex<Option<ReplayGainCallback>>,
}

impl Analyzer {
    pub fn new(format: AudioFormat) -> Self {
        let stage = if is_supported_sample_rate(format.sample_rate) {
            let calculator = Arc::new(Mutex::new(ReplayGainCalculator::new(format.sample_rate)));
            let chain = build_gain_chain(format, Arc::clone(&calculator));
            Some(GainStage { chain, calculator })
        } else {
            None
        };

        Self {
            format,
            stage: Mutex::new(stage),
            decoder_finished: AtomicBool::new(false),
            result_last_calculated_us: AtomicI64::new(0),
            on_replay_gain: Mutex::new(None),
        }
    }

    pub fn set_on_replay_gain(&self, cb: ReplayGainCallback) {
        *self.on_replay_gain.lock() = Some(cb);
    }

    /// Processes one chunk, emitting an updated replay-gain reading when due.
    /// `queue_len_after` is the number of chunks still queued for this stage
    /// after this one, counting this one — the pipeline passes `1` for the
    /// final chunk of a finished decode so the last measurement is flushed.
    pub fn buffer_available(&self, chunk: &PcmChunk, queue_len_after: usize) {
        let mut stage_guard = self.stage.lock();
        let Some(stage) = stage_guard.as_mut() else {
            return;
        };

        // The chain's filtered output only drives the calculator's callback;
        // operate on a scratch copy so the chunk handed downstream is never
        // touched by the weighting filters.
        let mut scratch = chunk.data.clone();
        stage.chain.process_pcm_data(&mut scratch, self.format.sample_type);

        let decoder_finished = self.decoder_finished.load(Ordering::SeqCst);
        let last_calculated = self.result_last_calculated_us.load(Ordering::SeqCst);
        let due = (!decoder_finished && chunk.start_microseconds >= last_calculated + REPLAY_GAIN_UPDATE_INTERVAL_MICROSECONDS)
            || (decoder_finished && queue_len_after == 1);

        if due {
            self.result_last_calculated_us.store(chunk.start_microseconds, Ordering::SeqCst);
            let result = stage.calculator.lock().calculate_result();
            if let Some(cb) = self.on_replay_gain.lock().as_mut() {
                cb(result);
            }
        }
    }

    pub fn decoder_done(&self) {
        self.decoder_finished.store(true, Ordering::SeqCst);
    }

    pub fn reset_replay_gain(&self) {
        if let Some(stage) = self.stage.lock().as_ref() {
            stage.calculator.lock().reset();
        }
        self.result_last_calculated_us.store(0, Ordering::SeqCst);
    }
}

/// Two-stage ReplayGain weighting cascade: a high-shelf stage approximating
/// the equal-loudness tilt of the original Yule-Walk filter, followed by a
/// Butterworth-Q highpass that strips DC and sub-sonic content. Both stages
/// are derived at `format.sample_rate` from the same coefficient-design
/// formulas the equalizer uses, rather than per-rate lookup tables.
fn build_gain_chain(format: AudioFormat, calculator: Arc<Mutex<ReplayGainCalculator>>) -> IirFilterChain {
    let sample_rate = format.sample_rate as f64;
    let coeffs = [
        BiquadCoeffs::high_shelf(2_122.0, 1.0, sample_rate, 9.5),
        BiquadCoeffs::high_pass(20.0, std::f64::consts::FRAC_1_SQRT_2, sample_rate),
    ];
    let mut chain = IirFilterChain::new(&coeffs, format.channel_count as usize);
    chain.set_callback_filtered(Box::new(move |value, channel_index| {
        calculator.lock().filter_callback(*value, channel_index);
    }));
    chain
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

    fn silent_chunk(start_us: i64, frames: usize) -> PcmChunk {
        PcmChunk::new(vec![0u8; frames * 4], start_us, false)
    }

    #[test]
    fn unsupported_sample_rate_disables_analysis() {
        let analyzer = Analyzer::new(AudioFormat {
            sample_rate: 44_099,
            channel_count: 2,
            sample_type: SampleType::I16,
        });
        let received = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&received);
        analyzer.set_on_replay_gain(Box::new(move |_| *flag.lock() = true));
        analyzer.buffer_available(&silent_chunk(0, 1024), 0);
        analyzer.decoder_done();
        analyzer.buffer_available(&silent_chunk(0, 1024), 1);
        assert!(!*received.lock());
    }

    #[test]
    fn emits_once_decoder_finishes_with_one_buffer_left() {
        let analyzer = Analyzer::new(test_format());
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        analyzer.set_on_replay_gain(Box::new(move |_| *counter.lock() += 1));

        analyzer.buffer_available(&silent_chunk(0, 1024), 5);
        assert_eq!(*count.lock(), 0);

        analyzer.decoder_done();
        analyzer.buffer_available(&silent_chunk(100, 1024), 1);
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn emits_periodically_without_decoder_done() {
        let analyzer = Analyzer::new(test_format());
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        analyzer.set_on_replay_gain(Box::new(move |_| *counter.lock() += 1));

        analyzer.buffer_available(&silent_chunk(0, 1024), 10);
        assert_eq!(*count.lock(), 1);
        analyzer.buffer_available(&silent_chunk(1_000_000, 1024), 9);
        assert_eq!(*count.lock(), 1, "not yet 4s past the last measurement");
        analyzer.buffer_available(&silent_chunk(4_000_001, 1024), 8);
        assert_eq!(*count.lock(), 2);
    }

    #[test]
    fn reset_replay_gain_zeroes_the_calculator() {
        let analyzer = Analyzer::new(test_format());
        analyzer.buffer_available(&silent_chunk(0, 1024), 5);
        analyzer.reset_replay_gain();
        assert_eq!(analyzer.result_last_calculated_us.load(Ordering::SeqCst), 0);
    }
}
