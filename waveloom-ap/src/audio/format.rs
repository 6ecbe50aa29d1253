//! The pipeline's desired PCM format and the chunk type that flows between
//! stages.

use serde::{Deserialize, Serialize};

/// Sample encoding recognized by the IIR filter chain and the output feeder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
}

impl SampleType {
    /// Byte width of one sample of this type.
    pub fn byte_width(self) -> usize {
        match self {
            SampleType::I8 | SampleType::U8 => 1,
            SampleType::I16 | SampleType::U16 => 2,
            SampleType::I32 | SampleType::U32 | SampleType::F32 => 4,
        }
    }
}

/// (sample rate, channel count, sample width/signedness). The pipeline's
/// desired format is fixed at pipeline construction; the decoder may emit
/// other formats but all cached PCM is already converted to this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub sample_type: SampleType,
}

impl AudioFormat {
    pub const CD_QUALITY: AudioFormat = AudioFormat {
        sample_rate: 44_100,
        channel_count: 2,
        sample_type: SampleType::I16,
    };

    /// Bytes per interleaved frame (one sample per channel).
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_type.byte_width() * self.channel_count as usize
    }

    /// How many bytes correspond to `duration_us` microseconds of audio,
    /// rounded down to a whole number of frames.
    pub fn bytes_for_duration(&self, duration_us: i64) -> i64 {
        let frames = (duration_us as i128 * self.sample_rate as i128) / 1_000_000i128;
        (frames as i64) * self.bytes_per_frame() as i64
    }

    /// How many microseconds correspond to `bytes` of PCM in this format,
    /// rounded down to a whole number of frames.
    pub fn duration_for_bytes(&self, bytes: i64) -> i64 {
        let frames = bytes / self.bytes_per_frame() as i64;
        (frames as i128 * 1_000_000i128 / self.sample_rate as i128) as i64
    }

    /// Frame count spanning `duration_us` microseconds.
    pub fn frames_for_duration(&self, duration_us: i64) -> i64 {
        (duration_us as i128 * self.sample_rate as i128 / 1_000_000i128) as i64
    }
}

/// A contiguous byte buffer of PCM in the pipeline's desired format, tagged
/// with its start timestamp in microseconds from the track origin.
#[derive(Debug, Clone)]
pub struct PcmChunk {
    pub data: Vec<u8>,
    pub start_microseconds: i64,
    /// True if this chunk was produced in response to a seek, so the output
    /// stage can reset its reported-position bookkeeping.
    pub from_seek: bool,
}

impl PcmChunk {
    pub fn new(data: Vec<u8>, start_microseconds: i64, from_seek: bool) -> Self {
        Self {
            data,
            start_microseconds,
            from_seek,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_and_bytes_round_trip_on_frame_boundaries() {
        let fmt = AudioFormat::CD_QUALITY;
        let ms = 1234i64;
        let bytes = fmt.bytes_for_duration(ms * 1000);
        let back_us = fmt.duration_for_bytes(bytes);
        // quantized to the format's frame size, not necessarily exact
        assert_eq!(back_us, fmt.duration_for_bytes(fmt.bytes_for_duration(back_us)));
    }

    #[test]
    fn bytes_per_frame_matches_channel_and_width() {
        let fmt = AudioFormat::CD_QUALITY;
        assert_eq!(fmt.bytes_per_frame(), 4); // 2 channels * 2 bytes
    }

    #[test]
    fn zero_duration_is_zero_bytes() {
        let fmt = AudioFormat::CD_QUALITY;
        assert_eq!(fmt.bytes_for_duration(0), 0);
    }
}
