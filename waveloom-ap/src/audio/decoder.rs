//! Decodes local files and HTTP(S) streams — including SHOUTcast/ICY radio —
//! into PCM chunks in the pipeline's desired format.
//!
//! Runs its own OS thread per track (`Decoder::spawn`); `DecoderHandle` is
//! the cooperative control surface the pipeline uses to throttle it and, on
//! teardown, interrupt it.

use crate::audio::format::{AudioFormat, PcmChunk, SampleType};
use crate::audio::resampler::StatefulResampler;
use crate::error::DecodeError;
use parking_lot::Mutex;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CodecRegistry, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::warn;

pub type BufferCallback = Box<dyn FnMut(PcmChunk) + Send>;
pub type RadioTitleCallback = Box<dyn FnMut(String) + Send>;
pub type FinishedCallback = Box<dyn FnOnce() + Send>;
pub type ErrorCallback = Box<dyn FnOnce(DecodeError) + Send>;

fn codec_registry() -> &'static CodecRegistry {
    use std::sync::OnceLock;
    static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        registry.register_all::<symphonia::default::codecs::MpaDecoder>();
        registry.register_all::<symphonia::default::codecs::PcmDecoder>();
        registry.register_all::<symphonia::default::codecs::VorbisDecoder>();
        registry.register_all::<symphonia::default::codecs::FlacDecoder>();
        registry.register_all::<symphonia::default::codecs::AdpcmDecoder>();
        registry
    })
}

/// Cooperative control handle for a running decode thread.
pub struct DecoderHandle {
    delay_us: Arc<AtomicI64>,
    decoded_us: Arc<AtomicI64>,
    interrupt: Arc<AtomicBool>,
}

impl DecoderHandle {
    /// Sleep this many microseconds between reads; used by the pipeline to
    /// slow decoding once the cache has caught up.
    pub fn set_decoder_delay(&self, us: i64) {
        self.delay_us.store(us.max(0), Ordering::Relaxed);
    }

    pub fn decoded_microseconds(&self) -> i64 {
        self.decoded_us.load(Ordering::Relaxed)
    }

    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }
}

pub struct Decoder;

impl Decoder {
    /// Spawns the decode loop on its own thread. `url` is either a local
    /// filesystem path or an `http(s)://` URL.
    pub fn spawn(
        url: String,
        desired_format: AudioFormat,
        on_buffer: BufferCallback,
        on_radio_title: RadioTitleCallback,
        on_finished: FinishedCallback,
        on_error: ErrorCallback,
    ) -> DecoderHandle {
        let delay_us = Arc::new(AtomicI64::new(0));
        let decoded_us = Arc::new(AtomicI64::new(0));
        let interrupt = Arc::new(AtomicBool::new(false));

        let handle = DecoderHandle {
            delay_us: Arc::clone(&delay_us),
            decoded_us: Arc::clone(&decoded_us),
            interrupt: Arc::clone(&interrupt),
        };

        let thread_delay_us = Arc::clone(&delay_us);
        let thread_decoded_us = Arc::clone(&decoded_us);
        let thread_interrupt = Arc::clone(&interrupt);

        std::thread::Builder::new()
            .name("decoder".into())
            .spawn(move || {
                let on_radio_title = Arc::new(Mutex::new(on_radio_title));
                let mut on_buffer = on_buffer;
                let result = run_decode_loop(
                    &url,
                    desired_format,
                    &thread_delay_us,
                    &thread_decoded_us,
                    &thread_interrupt,
                    &mut on_buffer,
                    &on_radio_title,
                );
                match result {
                    Ok(()) if thread_interrupt.load(Ordering::Relaxed) => {}
                    Ok(()) => on_finished(),
                    Err(e) => on_error(e),
                }
            })
            .expect("failed to spawn decoder thread");

        handle
    }
}

fn run_decode_loop(
    url: &str,
    desired_format: AudioFormat,
    delay_us: &AtomicI64,
    decoded_us: &AtomicI64,
    interrupt: &AtomicBool,
    on_buffer: &mut BufferCallback,
    on_radio_title: &Arc<Mutex<RadioTitleCallback>>,
) -> Result<(), DecodeError> {
    let (source, extension_hint): (Box<dyn MediaSource>, Option<String>) = open_source(url, on_radio_title)?;

    let mss = MediaSourceStream::new(source, Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = extension_hint {
        hint.with_extension(&ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|_| DecodeError::ProbeFailure)?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTracks)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let source_rate = codec_params.sample_rate.ok_or(DecodeError::NoAudioTracks)?;
    let source_channels = codec_params
        .channels
        .map(|c| c.count() as u16)
        .ok_or(DecodeError::NoAudioTracks)?;

    let mut decoder = codec_registry()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat {
            format: e.to_string(),
        })?;

    let mut resampler = StatefulResampler::new(source_rate, desired_format.sample_rate, desired_format.channel_count, 4096)
        .map_err(|_| DecodeError::UnsupportedFormat {
            format: "resampler initialization failed".into(),
        })?;

    let mut emitted_bytes: i64 = 0;

    loop {
        if interrupt.load(Ordering::Relaxed) {
            return Ok(());
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                warn!("decode packet error: {e}");
                return Err(DecodeError::CorruptedData {
                    offset: emitted_bytes as u64,
                });
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(e) => {
                warn!("decode error: {e}");
                return Err(DecodeError::CorruptedData {
                    offset: emitted_bytes as u64,
                });
            }
        };

        let mut interleaved = Vec::new();
        interleave_to_f32(&decoded, &mut interleaved);
        if source_channels == 1 {
            duplicate_mono(&mut interleaved);
        }

        let resampled = resampler
            .process_chunk(&interleaved)
            .map_err(|_| DecodeError::UnsupportedFormat {
                format: "resampling failed".into(),
            })?;

        if resampled.is_empty() {
            continue;
        }

        let bytes = encode_f32_samples(&resampled, desired_format.sample_type);
        let start_us = desired_format.duration_for_bytes(emitted_bytes);
        emitted_bytes += bytes.len() as i64;
        decoded_us.store(desired_format.duration_for_bytes(emitted_bytes), Ordering::Relaxed);

        on_buffer(PcmChunk::new(bytes, start_us, false));

        let delay = delay_us.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_micros(delay as u64));
        }
    }

    Ok(())
}

fn open_source(
    url: &str,
    on_radio_title: &Arc<Mutex<RadioTitleCallback>>,
) -> Result<(Box<dyn MediaSource>, Option<String>), DecodeError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        let response = reqwest::blocking::Client::new()
            .get(url)
            .header("Icy-MetaData", "1")
            .send()
            .map_err(|e| DecodeError::NetworkError { reason: e.to_string() })?;

        if !response.status().is_success() {
            return Err(DecodeError::SourceNotFound { url: url.to_string() });
        }

        let metaint = response
            .headers()
            .get("icy-metaint")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());

        let extension = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .and_then(extension_for_content_type)
            .map(str::to_string);

        let source: Box<dyn MediaSource> = match metaint {
            Some(metaint) if metaint > 0 => {
                Box::new(IcyReader::new(response, metaint, Arc::clone(on_radio_title)))
            }
            _ => Box::new(NonSeekableSource::new(response)),
        };

        Ok((source, extension))
    } else {
        let file = std::fs::File::open(url).map_err(|_| DecodeError::SourceNotFound { url: url.to_string() })?;
        let extension = std::path::Path::new(url)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string);
        Ok((Box::new(file), extension))
    }
}

fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    match content_type.split(';').next()?.trim() {
        "audio/mpeg" => Some("mp3"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        "audio/ogg" | "application/ogg" => Some("ogg"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        _ => None,
    }
}

/// Wraps a non-seekable `Read` (an HTTP response body) as a symphonia
/// `MediaSource`. Any seek beyond the current position fails.
struct NonSeekableSource<R: Read + Send> {
    inner: R,
    position: u64,
}

impl<R: Read + Send> NonSeekableSource<R> {
    fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }
}

impl<R: Read + Send> Read for NonSeekableSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Send> Seek for NonSeekableSource<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(io::Error::new(io::ErrorKind::Unsupported, "stream is not seekable")),
        }
    }
}

impl<R: Read + Send + Sync> MediaSource for NonSeekableSource<R> {
    fn is_seekable(&self) -> bool {
        false
    }
    fn byte_len(&self) -> Option<u64> {
        None
    }
}

/// Strips SHOUTcast/ICY in-band metadata blocks out of the audio byte
/// stream, invoking a callback whenever the `StreamTitle` changes.
struct IcyReader<R: Read + Send> {
    inner: R,
    metaint: usize,
    bytes_until_meta: usize,
    position: u64,
    last_title: Option<String>,
    on_title: Arc<Mutex<RadioTitleCallback>>,
}

impl<R: Read + Send> IcyReader<R> {
    fn new(inner: R, metaint: usize, on_title: Arc<Mutex<RadioTitleCallback>>) -> Self {
        Self {
            inner,
            metaint,
            bytes_until_meta: metaint,
            position: 0,
            last_title: None,
            on_title,
        }
    }

    fn consume_metadata_block(&mut self) -> io::Result<()> {
        let mut len_byte = [0u8; 1];
        if self.inner.read_exact(&mut len_byte).is_err() {
            return Ok(());
        }
        let len = len_byte[0] as usize * 16;
        if len == 0 {
            return Ok(());
        }
        let mut block = vec![0u8; len];
        self.inner.read_exact(&mut block)?;

        let text = String::from_utf8_lossy(&block);
        if let Some(title) = parse_stream_title(&text) {
            if self.last_title.as_deref() != Some(title.as_str()) {
                self.last_title = Some(title.clone());
                (self.on_title.lock())(title);
            }
        }
        Ok(())
    }
}

fn parse_stream_title(metadata: &str) -> Option<String> {
    let start = metadata.find("StreamTitle='")? + "StreamTitle='".len();
    let rest = &metadata[start..];
    let end = rest.find("';")?;
    Some(rest[..end].to_string())
}

impl<R: Read + Send> Read for IcyReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.metaint == 0 {
            let n = self.inner.read(buf)?;
            self.position += n as u64;
            return Ok(n);
        }

        let want = buf.len().min(self.bytes_until_meta);
        let n = if want == 0 {
            self.consume_metadata_block()?;
            self.bytes_until_meta = self.metaint;
            let want = buf.len().min(self.bytes_until_meta);
            let n = self.inner.read(&mut buf[..want])?;
            self.bytes_until_meta -= n;
            n
        } else {
            let n = self.inner.read(&mut buf[..want])?;
            self.bytes_until_meta -= n;
            n
        };

        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Read + Send> Seek for IcyReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.position),
            _ => Err(io::Error::new(io::ErrorKind::Unsupported, "radio stream is not seekable")),
        }
    }
}

impl<R: Read + Send + Sync> MediaSource for IcyReader<R> {
    fn is_seekable(&self) -> bool {
        false
    }
    fn byte_len(&self) -> Option<u64> {
        None
    }
}

fn interleave_to_f32(decoded: &AudioBufferRef, output: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::F32(buf) => push_planar(buf, output, |s| s),
        AudioBufferRef::F64(buf) => push_planar(buf, output, |s| s as f32),
        AudioBufferRef::S32(buf) => push_planar(buf, output, |s| s as f32 / i32::MAX as f32),
        AudioBufferRef::S16(buf) => push_planar(buf, output, |s| s as f32 / i16::MAX as f32),
        AudioBufferRef::U32(buf) => push_planar(buf, output, |s| (s as i64 - (i32::MAX as i64 + 1)) as f32 / i32::MAX as f32),
        AudioBufferRef::U16(buf) => push_planar(buf, output, |s| (s as i32 - 32768) as f32 / 32768.0),
        AudioBufferRef::U8(buf) => push_planar(buf, output, |s| (s as i32 - 128) as f32 / 128.0),
        AudioBufferRef::S8(buf) => push_planar(buf, output, |s| s as f32 / i8::MAX as f32),
        AudioBufferRef::S24(buf) => push_planar(buf, output, |s| s.inner() as f32 / 8_388_608.0),
        AudioBufferRef::U24(buf) => push_planar(buf, output, |s| (s.inner() as i32 - 8_388_608) as f32 / 8_388_608.0),
    }
}

fn push_planar<S: symphonia::core::sample::Sample + Copy>(
    buf: &symphonia::core::audio::AudioBuffer<S>,
    output: &mut Vec<f32>,
    to_f32: impl Fn(S) -> f32,
) {
    let channels = buf.spec().channels.count();
    let frames = buf.frames();
    for frame_idx in 0..frames {
        for ch in 0..channels {
            output.push(to_f32(buf.chan(ch)[frame_idx]));
        }
    }
}

fn duplicate_mono(samples: &mut Vec<f32>) {
    let original_len = samples.len();
    samples.reserve(original_len);
    for i in (0..original_len).rev() {
        samples.insert(i + 1, samples[i]);
    }
}

fn encode_f32_samples(samples: &[f32], sample_type: SampleType) -> Vec<u8> {
    let width = sample_type.byte_width();
    let mut out = vec![0u8; samples.len() * width];
    for (i, &s) in samples.iter().enumerate() {
        let slice = &mut out[i * width..(i + 1) * width];
        match sample_type {
            SampleType::I8 => slice[0] = (s.clamp(-1.0, 1.0) * i8::MAX as f32) as i8 as u8,
            SampleType::U8 => slice[0] = ((s.clamp(-1.0, 1.0) * 0.5 + 0.5) * u8::MAX as f32) as u8,
            SampleType::I16 => slice.copy_from_slice(&((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes()),
            SampleType::U16 => slice.copy_from_slice(&(((s.clamp(-1.0, 1.0) * 0.5 + 0.5) * u16::MAX as f32) as u16).to_le_bytes()),
            SampleType::I32 => slice.copy_from_slice(&((s.clamp(-1.0, 1.0) * i32::MAX as f32) as i32).to_le_bytes()),
            SampleType::U32 => slice.copy_from_slice(&(((s.clamp(-1.0, 1.0) * 0.5 + 0.5) * u32::MAX as f32) as u32).to_le_bytes()),
            SampleType::F32 => slice.copy_from_slice(&s.clamp(-1.0, 1.0).to_le_bytes()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_mono_interleaves_each_sample_twice() {
        let mut samples = vec![0.1, 0.2, 0.3];
        duplicate_mono(&mut samples);
        assert_eq!(samples, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn encode_i16_round_trips_full_scale() {
        let bytes = encode_f32_samples(&[1.0, -1.0], SampleType::I16);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -(i16::MAX));
    }

    #[test]
    fn parses_stream_title_out_of_icy_metadata_block() {
        let meta = "StreamTitle='Artist - Track';StreamUrl='http://example.com';";
        assert_eq!(parse_stream_title(meta), Some("Artist - Track".to_string()));
    }

    #[test]
    fn missing_stream_title_yields_none() {
        assert_eq!(parse_stream_title("garbage"), None);
    }

    #[test]
    fn extension_guessed_from_common_content_types() {
        assert_eq!(extension_for_content_type("audio/mpeg"), Some("mp3"));
        assert_eq!(extension_for_content_type("audio/flac; charset=utf-8"), Some("flac"));
        assert_eq!(extension_for_content_type("text/html"), None);
    }
}
