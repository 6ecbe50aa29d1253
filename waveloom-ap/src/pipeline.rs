//! Wires decoder -> cache -> analyzer -> equalizer -> output into one
//! playable track, owns the per-stage worker threads, and drives the linear
//! fade envelope and finish/fadeout-started notifications.

use crate::analyzer::Analyzer;
use crate::audio::decoder::{Decoder, DecoderHandle};
use crate::audio::output::SoundOutput;
use crate::audio::{AudioFormat, PcmChunk, SampleType};
use crate::equalizer::{center_frequencies_for, Equalizer};
use crate::pcm_cache::{PcmCache, BUFFER_CREATE_MILLISECONDS};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use waveloom_common::events::{EventBus, PlaybackState, PlayerEvent};

const UNDERRUN_WATCHDOG_SECONDS: u64 = 5;

/// Everything a pipeline knows about the track before decoding starts.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    pub id: String,
    pub url: String,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_id: Option<String>,
    pub track_number: Option<i32>,
    pub tags: Vec<String>,
    /// `None` when the length is not known in advance (e.g. a radio stream).
    pub length_milliseconds: Option<i64>,
    pub fade_duration_seconds: Option<i64>,
    pub radio_station: bool,
    pub favorite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FadeDirection {
    None,
    In,
    Out,
}

struct FadeState {
    direction: FadeDirection,
    percent: i64,
    frame_count: f64,
    frames_per_percent: f64,
}

impl FadeState {
    fn new(frames_per_percent: f64) -> Self {
        Self {
            direction: FadeDirection::None,
            percent: 0,
            frame_count: 0.0,
            frames_per_percent,
        }
    }

    fn start_in(&mut self) {
        self.direction = FadeDirection::In;
        self.percent = 0;
        self.frame_count = 0.0;
    }

    fn start_out(&mut self) {
        self.direction = FadeDirection::Out;
        self.percent = 100;
        self.frame_count = 0.0;
    }

    /// Scales every sample in `data` by `percent/100`, advancing the percent
    /// counter at `frames_per_percent`-frame granularity. Returns `true` once
    /// a fade-out reaches silence.
    fn apply(&mut self, data: &mut [u8], sample_type: SampleType, channel_count: u16) -> bool {
        if self.direction == FadeDirection::None {
            return false;
        }
        let width = sample_type.byte_width();
        let frames_per_sample = 1.0 / channel_count.max(1) as f64;

        for frame in data.chunks_mut(width) {
            if frame.len() < width {
                break;
            }
            scale_sample_in_place(frame, sample_type, self.percent);

            self.frame_count += frames_per_sample;
            if self.frame_count < self.frames_per_percent {
                continue;
            }
            self.frame_count = 0.0;

            match self.direction {
                FadeDirection::In if self.percent < 100 => {
                    self.percent += 1;
                    if self.percent == 100 {
                        self.direction = FadeDirection::None;
                    }
                }
                FadeDirection::Out if self.percent > 0 => {
                    self.percent -= 1;
                    if self.percent == 0 {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }
}

/// Scales one sample in place by `percent/100`, matching the original's
/// literal integer truncation for integer sample types.
fn scale_sample_in_place(frame: &mut [u8], sample_type: SampleType, percent: i64) {
    match sample_type {
        SampleType::I8 => {
            let v = frame[0] as i8 as i64;
            frame[0] = ((percent * v) / 100) as i8 as u8;
        }
        SampleType::U8 => {
            let v = frame[0] as i64;
            frame[0] = ((percent * v) / 100) as u8;
        }
        SampleType::I16 => {
            let v = i16::from_ne_bytes([frame[0], frame[1]]) as i64;
            let scaled = ((percent * v) / 100) as i16;
            frame.copy_from_slice(&scaled.to_ne_bytes());
        }
        SampleType::U16 => {
            let v = u16::from_ne_bytes([frame[0], frame[1]]) as i64;
            let scaled = ((percent * v) / 100) as u16;
            frame.copy_from_slice(&scaled.to_ne_bytes());
        }
        SampleType::I32 => {
            let v = i32::from_ne_bytes(frame.try_into().unwrap()) as i64;
            let scaled = ((percent * v) / 100) as i32;
            frame.copy_from_slice(&scaled.to_ne_bytes());
        }
        SampleType::U32 => {
            let v = u32::from_ne_bytes(frame.try_into().unwrap()) as i64;
            let scaled = ((percent * v) / 100) as u32;
            frame.copy_from_slice(&scaled.to_ne_bytes());
        }
        SampleType::F32 => {
            let v = f32::from_ne_bytes(frame.try_into().unwrap());
            let scaled = v * (percent as f32 / 100.0);
            frame.copy_from_slice(&scaled.to_ne_bytes());
        }
    }
}

enum CacheCommand {
    Seek(i64),
}

/// State touched from callbacks that fire on stage-owned threads; kept
/// separate from [`TrackPipeline`] so those closures can hold an `Arc` to
/// just this, without a reference back to the owning pipeline.
struct Shared {
    id: String,
    format: AudioFormat,
    event_bus: Arc<EventBus>,
    do_fade: bool,
    fade_duration_seconds: i64,
    status: Mutex<PlaybackState>,
    stopping: AtomicBool,
    decoding_done: AtomicBool,
    finished_sent: AtomicBool,
    fadeout_started_sent: AtomicBool,
    pos_milliseconds: AtomicI64,
    fadeout_start_milliseconds: AtomicI64,
    known_length_milliseconds: AtomicI64,
    fade: Mutex<FadeState>,
    underrun_watch_armed: AtomicBool,
    radio_titles: Mutex<VecDeque<(i64, String)>>,
    decoder_handle: Mutex<Option<DecoderHandle>>,
}

impl Shared {
    fn emit(&self, event: PlayerEvent) {
        self.event_bus.emit_lossy(event);
    }

    fn change_status(&self, status: PlaybackState) {
        *self.status.lock() = status;
        self.emit(PlayerEvent::StateChanged {
            track_id: self.id.clone(),
            state: status,
            timestamp: chrono::Utc::now(),
        });
    }

    fn send_finished(&self) {
        if self.finished_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        self.emit(PlayerEvent::Finished {
            track_id: self.id.clone(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn send_fadeout_started(&self) {
        if self.fadeout_started_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        self.emit(PlayerEvent::FadeoutStarted {
            track_id: self.id.clone(),
            timestamp: chrono::Utc::now(),
        });
    }

    fn decoded_milliseconds(&self) -> i64 {
        self.decoder_handle
            .lock()
            .as_ref()
            .map(|h| h.decoded_microseconds() / 1000)
            .unwrap_or(0)
    }
}

/// A single track's decode/cache/analyze/equalize/output chain, plus its
/// Idle/Decoding/Playing/Paused state machine.
pub struct TrackPipeline {
    shared: Arc<Shared>,
    cache: Arc<PcmCache>,
    analyzer: Arc<Analyzer>,
    equalizer: Arc<Equalizer>,
    output: Arc<SoundOutput>,
    info: TrackInfo,
    threads: Mutex<Vec<JoinHandle<()>>>,
    interrupt: Arc<AtomicBool>,
    decode_started: AtomicBool,
    equalizer_started: AtomicBool,
    seek_tx: Sender<CacheCommand>,
    seek_rx: Receiver<CacheCommand>,
    equalizer_tx: Sender<PcmChunk>,
    equalizer_rx: Receiver<PcmChunk>,
    analyzer_tx: Sender<PcmChunk>,
    analyzer_rx: Receiver<PcmChunk>,
}

impl TrackPipeline {
    pub fn new(
        info: TrackInfo,
        format: AudioFormat,
        event_bus: Arc<EventBus>,
        fade_tags: &[String],
        default_fade_seconds: i64,
    ) -> crate::error::Result<Arc<Self>> {
        let do_fade = info
            .tags
            .iter()
            .any(|t| fade_tags.iter().any(|ft| ft.eq_ignore_ascii_case(t)));

        let fade_duration_seconds = info.fade_duration_seconds.unwrap_or(default_fade_seconds);
        let frames_per_percent = format.frames_for_duration(fade_duration_seconds * 1_000_000) as f64 / 100.0;

        let fadeout_start_milliseconds = info
            .length_milliseconds
            .filter(|ms| *ms > 0)
            .map(|ms| ms - (fade_duration_seconds + 1) * 1000)
            .unwrap_or(i64::MAX);

        let cache = Arc::new(PcmCache::new(format, info.length_milliseconds.unwrap_or(0), info.radio_station)?);
        let analyzer = Arc::new(Analyzer::new(format));
        let equalizer = Arc::new(Equalizer::new(format));
        let output = Arc::new(SoundOutput::new(format));

        let shared = Arc::new(Shared {
            id: info.id.clone(),
            format,
            event_bus,
            do_fade,
            fade_duration_seconds,
            status: Mutex::new(PlaybackState::Idle),
            stopping: AtomicBool::new(false),
            decoding_done: AtomicBool::new(false),
            finished_sent: AtomicBool::new(false),
            fadeout_started_sent: AtomicBool::new(false),
            pos_milliseconds: AtomicI64::new(0),
            fadeout_start_milliseconds: AtomicI64::new(fadeout_start_milliseconds),
            known_length_milliseconds: AtomicI64::new(info.length_milliseconds.unwrap_or(0)),
            fade: Mutex::new(FadeState::new(frames_per_percent)),
            underrun_watch_armed: AtomicBool::new(false),
            radio_titles: Mutex::new(VecDeque::new()),
            decoder_handle: Mutex::new(None),
        });

        let (seek_tx, seek_rx) = unbounded();
        let (equalizer_tx, equalizer_rx) = unbounded();
        let (analyzer_tx, analyzer_rx) = unbounded();

        let pipeline = Arc::new(Self {
            shared,
            cache,
            analyzer,
            equalizer,
            output,
            info,
            threads: Mutex::new(Vec::new()),
            interrupt: Arc::new(AtomicBool::new(false)),
            decode_started: AtomicBool::new(false),
            equalizer_started: AtomicBool::new(false),
            seek_tx,
            seek_rx,
            equalizer_tx,
            equalizer_rx,
            analyzer_tx,
            analyzer_rx,
        });

        pipeline.wire_callbacks();
        Ok(pipeline)
    }

    fn wire_callbacks(self: &Arc<Self>) {
        let cache_equalizer_tx = self.equalizer_tx.clone();
        self.cache.set_on_chunk(Box::new(move |chunk| {
            let _ = cache_equalizer_tx.send(chunk);
        }));

        let equalizer_for_rg = Arc::clone(&self.equalizer);
        self.analyzer.set_on_replay_gain(Box::new(move |rg| {
            equalizer_for_rg.set_replay_gain(rg);
        }));

        let shared_for_rg_changed = Arc::clone(&self.shared);
        self.equalizer.set_on_replay_gain_changed(Box::new(move |current_db| {
            shared_for_rg_changed.emit(PlayerEvent::ReplayGainChanged {
                track_id: shared_for_rg_changed.id.clone(),
                current_db,
                timestamp: chrono::Utc::now(),
            });
        }));

        let shared_for_chunk = Arc::clone(&self.shared);
        let output_for_chunk = Arc::clone(&self.output);
        self.equalizer.set_on_chunk_equalized(Box::new(move |mut chunk| {
            handle_equalized_chunk(&shared_for_chunk, &output_for_chunk, &mut chunk);
            let _ = output_for_chunk.push_chunk(chunk);
        }));

        let shared_for_peak = Arc::clone(&self.shared);
        self.output.set_on_peak(Box::new(move |left, right, delay_us| {
            shared_for_peak.emit(PlayerEvent::PeakLevels {
                track_id: shared_for_peak.id.clone(),
                left,
                right,
                delay_us,
                timestamp: chrono::Utc::now(),
            });
        }));

        let shared_for_pos = Arc::clone(&self.shared);
        let analyzer_reset = Arc::clone(&self.analyzer);
        self.output.set_on_position(Box::new(move |pos_ms| {
            handle_position_changed(&shared_for_pos, &analyzer_reset, pos_ms);
        }));

        let shared_for_underrun = Arc::clone(&self.shared);
        self.output.set_on_underrun(Box::new(move || {
            handle_underrun(&shared_for_underrun);
        }));
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn status(&self) -> PlaybackState {
        *self.shared.status.lock()
    }

    pub fn position_milliseconds(&self) -> i64 {
        self.shared.pos_milliseconds.load(Ordering::SeqCst)
    }

    pub fn decoding_done(&self) -> bool {
        self.shared.decoding_done.load(Ordering::SeqCst)
    }

    pub fn length_milliseconds(&self) -> i64 {
        if self.shared.decoding_done.load(Ordering::SeqCst) {
            self.shared.decoded_milliseconds()
        } else {
            self.shared.known_length_milliseconds.load(Ordering::SeqCst)
        }
    }

    pub fn equalizer_band_center_frequencies(&self, band_count: usize) -> Vec<f64> {
        center_frequencies_for(band_count).to_vec()
    }

    pub fn set_gains(&self, on: bool, gains: &[f64], pre_amp_db: f64) {
        self.equalizer.set_gains(on, gains, pre_amp_db);
    }

    pub fn set_wide_stereo_delay_ms(&self, ms: f64) {
        self.equalizer.set_wide_stereo_delay_ms(ms);
    }

    pub fn set_soft_clip(&self, enabled: bool) {
        self.equalizer.set_soft_clip(enabled);
    }

    pub fn set_peak_fps(&self, fps: u32) {
        self.output.set_peak_fps(fps);
    }

    pub fn peak_fps(&self) -> u32 {
        self.output.peak_fps()
    }

    pub fn set_peak_delay_us(&self, us: i64) {
        self.output.set_peak_delay_us(us);
    }

    pub fn request_replay_gain_info(&self) {
        self.equalizer.request_replay_gain_info();
    }

    /// Drives the `Idle -> Decoding -> Playing <-> Paused` state machine.
    /// Transitions between non-adjacent or already-current states are no-ops,
    /// matching the idempotent behavior of the original signal handler.
    pub fn set_status(self: &Arc<Self>, status: PlaybackState) {
        let current = *self.shared.status.lock();

        match (current, status) {
            (_, PlaybackState::Idle) => {
                let already_stopping = self.shared.stopping.load(Ordering::SeqCst);
                if current == PlaybackState::Playing && !already_stopping {
                    self.shared.stopping.store(true, Ordering::SeqCst);
                    self.shared.fade.lock().start_out();
                } else if !already_stopping {
                    self.shared.send_finished();
                }
            }
            (PlaybackState::Idle, PlaybackState::Decoding) => {
                self.start_decode_threads();
                self.shared.change_status(PlaybackState::Decoding);
            }
            (PlaybackState::Idle, PlaybackState::Playing) | (PlaybackState::Decoding, PlaybackState::Playing) => {
                self.start_decode_threads();
                self.start_equalizer_thread();
                if self.shared.do_fade {
                    self.shared.fade.lock().start_in();
                }
                self.shared.change_status(PlaybackState::Playing);
            }
            (PlaybackState::Playing, PlaybackState::Paused) => {
                self.output.pause();
                self.shared.change_status(PlaybackState::Paused);
            }
            (PlaybackState::Paused, PlaybackState::Playing) => {
                self.shared.fade.lock().start_in();
                self.output.resume();
                self.shared.change_status(PlaybackState::Playing);
            }
            _ => {}
        }
    }

    /// Seeks by fraction of the track's known length; no-op for tracks with
    /// unknown length (radio streams) or while not playing.
    pub fn set_position(&self, percent: f64) {
        if *self.shared.status.lock() != PlaybackState::Playing {
            return;
        }
        let length = self.length_milliseconds();
        if length <= 0 {
            return;
        }
        let new_position = (percent.clamp(0.0, 1.0) * length as f64) as i64;
        self.output.pause();
        self.output.resume();
        let _ = self.seek_tx.send(CacheCommand::Seek(new_position));
    }

    fn start_decode_threads(self: &Arc<Self>) {
        if self.decode_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let decoder_on_buffer = {
            let cache = Arc::clone(&self.cache);
            let shared = Arc::clone(&self.shared);
            let analyzer_tx = self.analyzer_tx.clone();
            Box::new(move |chunk: PcmChunk| {
                if let Err(e) = cache.store_buffer(&chunk.data) {
                    shared.emit(PlayerEvent::PlayerError {
                        track_id: Some(shared.id.clone()),
                        code: "cache_write_failed".into(),
                        message: e.to_string(),
                        fatal: true,
                        timestamp: chrono::Utc::now(),
                    });
                }
                let _ = analyzer_tx.send(chunk);
            })
        };

        let decoder_on_radio_title = {
            let shared = Arc::clone(&self.shared);
            let output = Arc::clone(&self.output);
            let equalizer_rx_for_radio = self.equalizer_rx.clone();
            Box::new(move |title: String| {
                let decoded_us = shared.decoded_milliseconds() * 1_000;
                let queued_us = equalizer_rx_for_radio.len() as i64 * BUFFER_CREATE_MILLISECONDS * 1_000;
                let timestamp_us = decoded_us + queued_us + output.pending_microseconds() - BUFFER_CREATE_MILLISECONDS * 1_000;
                shared.radio_titles.lock().push_back((timestamp_us.max(0), title));
            })
        };

        let decoder_on_finished = {
            let shared = Arc::clone(&self.shared);
            let analyzer = Arc::clone(&self.analyzer);
            let fade_duration_seconds = shared.fade_duration_seconds;
            Box::new(move || {
                shared.decoding_done.store(true, Ordering::SeqCst);
                analyzer.decoder_done();
                let decoded_ms = shared.decoded_milliseconds();
                shared.known_length_milliseconds.store(decoded_ms, Ordering::SeqCst);
                shared
                    .fadeout_start_milliseconds
                    .store(decoded_ms - (fade_duration_seconds + 1) * 1000, Ordering::SeqCst);
            })
        };

        let decoder_on_error = {
            let shared = Arc::clone(&self.shared);
            Box::new(move |e: crate::error::DecodeError| {
                shared.emit(PlayerEvent::PlayerError {
                    track_id: Some(shared.id.clone()),
                    code: "decode_failed".into(),
                    message: e.to_string(),
                    fatal: false,
                    timestamp: chrono::Utc::now(),
                });
                let pos_ms = shared.pos_milliseconds.load(Ordering::SeqCst);
                if *shared.status.lock() == PlaybackState::Playing && shared.decoded_milliseconds() - 1000 > pos_ms {
                    shared.decoding_done.store(true, Ordering::SeqCst);
                    return;
                }
                shared.send_finished();
            })
        };

        let handle = Decoder::spawn(
            self.info.url.clone(),
            self.shared.format,
            decoder_on_buffer,
            decoder_on_radio_title,
            decoder_on_finished,
            decoder_on_error,
        );
        *self.shared.decoder_handle.lock() = Some(handle);

        let interrupt = Arc::clone(&self.interrupt);
        let cache = Arc::clone(&self.cache);
        let shared = Arc::clone(&self.shared);
        let seek_rx = self.seek_rx.clone();
        let cache_thread = std::thread::Builder::new()
            .name("cache".into())
            .spawn(move || {
                let pull_interval = Duration::from_millis(BUFFER_CREATE_MILLISECONDS as u64);
                while !interrupt.load(Ordering::SeqCst) {
                    if let Ok(CacheCommand::Seek(ms)) = seek_rx.try_recv() {
                        cache.request_timestamp_pcm_chunk(ms);
                    } else {
                        let pullable = matches!(*shared.status.lock(), PlaybackState::Decoding | PlaybackState::Playing);
                        if pullable {
                            cache.request_next_pcm_chunk();
                        }
                    }
                    std::thread::sleep(pull_interval);
                }
            })
            .expect("failed to spawn cache thread");

        let interrupt = Arc::clone(&self.interrupt);
        let analyzer = Arc::clone(&self.analyzer);
        let analyzer_rx = self.analyzer_rx.clone();
        let analyzer_thread = std::thread::Builder::new()
            .name("analyzer".into())
            .spawn(move || {
                while !interrupt.load(Ordering::SeqCst) {
                    match analyzer_rx.recv_timeout(Duration::from_millis(200)) {
                        Ok(chunk) => {
                            let queue_len_after = analyzer_rx.len() + 1;
                            analyzer.buffer_available(&chunk, queue_len_after);
                        }
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("failed to spawn analyzer thread");

        self.threads.lock().push(cache_thread);
        self.threads.lock().push(analyzer_thread);
    }

    fn start_equalizer_thread(self: &Arc<Self>) {
        if self.equalizer_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.equalizer.play_begins();

        let interrupt = Arc::clone(&self.interrupt);
        let equalizer = Arc::clone(&self.equalizer);
        let equalizer_rx = self.equalizer_rx.clone();
        let thread = std::thread::Builder::new()
            .name("equalizer".into())
            .spawn(move || {
                while !interrupt.load(Ordering::SeqCst) {
                    match equalizer_rx.recv_timeout(Duration::from_millis(200)) {
                        Ok(chunk) => equalizer.chunk_available(vec![chunk]),
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("failed to spawn equalizer thread");

        self.threads.lock().push(thread);
    }

    /// Interrupts every stage thread, in output -> equalizer -> analyzer ->
    /// cache -> decoder order, and joins them.
    pub fn teardown(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
        if let Some(handle) = self.shared.decoder_handle.lock().take() {
            handle.interrupt();
        }
        self.output.stop();
        for t in self.threads.lock().drain(..) {
            let _ = t.join();
        }
    }
}

impl Drop for TrackPipeline {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn handle_equalized_chunk(shared: &Arc<Shared>, output: &Arc<SoundOutput>, chunk: &mut PcmChunk) {
    let mut fade = shared.fade.lock();

    let fadeout_start_ms = shared.fadeout_start_milliseconds.load(Ordering::SeqCst);
    if shared.do_fade && fade.direction == FadeDirection::None && chunk.start_microseconds / 1000 >= fadeout_start_ms {
        fade.start_out();
    }

    if fade.direction != FadeDirection::None {
        let reached_silence = fade.apply(&mut chunk.data, shared.format.sample_type, shared.format.channel_count);
        if reached_silence {
            let remaining_ms = output.pending_microseconds() / 1000 + BUFFER_CREATE_MILLISECONDS;
            schedule_send_finished(Arc::clone(shared), remaining_ms);
        }
    }
}

fn schedule_send_finished(shared: Arc<Shared>, delay_ms: i64) {
    std::thread::spawn(move || {
        if delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(delay_ms as u64));
        }
        shared.send_finished();
    });
}

fn handle_position_changed(shared: &Arc<Shared>, analyzer: &Arc<Analyzer>, pos_ms: i64) {
    shared.pos_milliseconds.store(pos_ms, Ordering::SeqCst);
    shared.emit(PlayerEvent::PositionChanged {
        track_id: shared.id.clone(),
        position_ms: pos_ms,
        timestamp: chrono::Utc::now(),
    });

    let decoding_done = shared.decoding_done.load(Ordering::SeqCst);
    let decoded_ms = shared.decoded_milliseconds();

    if !decoding_done {
        if let Some(handle) = shared.decoder_handle.lock().as_ref() {
            let behind_ms = (decoded_ms - pos_ms).max(1) as f64;
            let delay_us = 4f64.powf(behind_ms.log10());
            handle.set_decoder_delay(delay_us as i64);
        }
    }

    if decoding_done && pos_ms >= decoded_ms {
        shared.send_finished();
        return;
    }

    if pos_ms >= shared.fadeout_start_milliseconds.load(Ordering::SeqCst) && shared.fade.lock().direction == FadeDirection::Out {
        shared.send_fadeout_started();
        return;
    }

    let mut titles = shared.radio_titles.lock();
    if let Some((timestamp_us, _)) = titles.front() {
        if *timestamp_us <= pos_ms * 1000 {
            titles.pop_front();
            drop(titles);
            analyzer.reset_replay_gain();
        }
    }
}

fn handle_underrun(shared: &Arc<Shared>) {
    let decoding_done = shared.decoding_done.load(Ordering::SeqCst);
    let pos_ms = shared.pos_milliseconds.load(Ordering::SeqCst);
    let decoded_ms = shared.decoded_milliseconds();

    if decoding_done && pos_ms >= decoded_ms - 1000 {
        shared.send_finished();
        return;
    }

    if shared.underrun_watch_armed.swap(true, Ordering::SeqCst) {
        return;
    }

    let shared = Arc::clone(shared);
    let decoded_ms_at_underrun = decoded_ms;
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(UNDERRUN_WATCHDOG_SECONDS));
        shared.underrun_watch_armed.store(false, Ordering::SeqCst);
        if shared.decoding_done.load(Ordering::SeqCst) {
            return;
        }
        if shared.decoded_milliseconds() >= decoded_ms_at_underrun {
            shared.emit(PlayerEvent::PlayerError {
                track_id: Some(shared.id.clone()),
                code: "buffer_underrun".into(),
                message: "Buffer underrun: possible download interruption due to a network error".into(),
                fatal: false,
                timestamp: chrono::Utc::now(),
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_format() -> AudioFormat {
        AudioFormat {
            sample_rate: 44_100,
            channel_count: 2,
            sample_type: SampleType::I16,
        }
    }

    #[test]
    fn fade_in_reaches_full_volume_without_reporting_silence() {
        let mut fade = FadeState::new(10.0);
        fade.start_in();
        let mut data = vec![0u8; 4 * 400];
        let sample = 1000i16.to_ne_bytes();
        for chunk in data.chunks_mut(4) {
            chunk[0..2].copy_from_slice(&sample);
            chunk[2..4].copy_from_slice(&sample);
        }
        let reached_silence = fade.apply(&mut data, SampleType::I16, 2);
        assert!(!reached_silence);
        assert_eq!(fade.direction, FadeDirection::None);
        assert_eq!(fade.percent, 100);
    }

    #[test]
    fn fade_out_reaches_silence_and_reports_it() {
        let mut fade = FadeState::new(5.0);
        fade.start_out();
        let mut data = vec![0u8; 4 * 400];
        let sample = 2000i16.to_ne_bytes();
        for chunk in data.chunks_mut(4) {
            chunk[0..2].copy_from_slice(&sample);
            chunk[2..4].copy_from_slice(&sample);
        }
        let reached_silence = fade.apply(&mut data, SampleType::I16, 2);
        assert!(reached_silence);
        assert_eq!(fade.percent, 0);
    }

    #[test]
    fn scale_sample_halves_value_at_fifty_percent() {
        let mut frame = 1000i16.to_ne_bytes();
        scale_sample_in_place(&mut frame, SampleType::I16, 50);
        assert_eq!(i16::from_ne_bytes(frame), 500);
    }

    #[test]
    fn scale_sample_zeroes_at_zero_percent() {
        let mut frame = 12345i16.to_ne_bytes();
        scale_sample_in_place(&mut frame, SampleType::I16, 0);
        assert_eq!(i16::from_ne_bytes(frame), 0);
    }

    #[test]
    fn new_pipeline_starts_idle() {
        let bus = Arc::new(EventBus::new(16));
        let info = TrackInfo {
            id: "t1".into(),
            url: "file:///tmp/does-not-matter.wav".into(),
            title: "Test".into(),
            artist: "Tester".into(),
            album: "Test Album".into(),
            album_id: None,
            track_number: None,
            tags: vec![],
            length_milliseconds: Some(10_000),
            fade_duration_seconds: None,
            radio_station: false,
            favorite: false,
        };
        let pipeline = TrackPipeline::new(info, test_format(), bus, &[], 4).unwrap();
        assert_eq!(pipeline.status(), PlaybackState::Idle);
        assert_eq!(pipeline.position_milliseconds(), 0);
    }

    #[test]
    fn set_position_is_noop_when_not_playing() {
        let bus = Arc::new(EventBus::new(16));
        let info = TrackInfo {
            id: "t1".into(),
            url: "file:///tmp/does-not-matter.wav".into(),
            title: "Test".into(),
            artist: "Tester".into(),
            album: "Test Album".into(),
            album_id: None,
            track_number: None,
            tags: vec![],
            length_milliseconds: Some(10_000),
            fade_duration_seconds: None,
            radio_station: false,
            favorite: false,
        };
        let pipeline = TrackPipeline::new(info, test_format(), bus, &[], 4).unwrap();
        pipeline.set_position(0.5);
        assert!(pipeline.seek_rx.try_recv().is_err());
    }
}
