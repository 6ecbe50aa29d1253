//! Owns the playlist, play history, and crossfade/shuffle/peak-meter policy
//! atop one or more [`TrackPipeline`]s. A pipeline only knows how to play
//! itself; the controller decides which pipeline plays next and when.

use crate::audio::AudioFormat;
use crate::pipeline::{TrackInfo, TrackPipeline};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use waveloom_common::events::{EventBus, PlaybackState, PlayerEvent};

const DEFAULT_SHUFFLE_DELAY_SECONDS: f64 = 10.0;
const DEFAULT_SHUFFLE_COUNT: usize = 5;
const DEFAULT_SHUFFLE_FAVORITE_FREQUENCY: usize = 4;
const DEFAULT_MAX_PEAK_FPS: i64 = 25;
const DEFAULT_FADE_SECONDS: i64 = 4;
const DEFAULT_PEAK_DELAY_MS: i64 = 333;
const PRE_DECODE_LOOKAHEAD_MS: i64 = 20_000;
const PEAK_FPS_INCREASE_INTERVAL_MS: f64 = 150.0;
const PEAK_FPS_CHECK_INTERVAL_MS: f64 = 333.0;

/// User-configurable knobs the controller consults; the values a `config`
/// layer would load from file/environment/CLI and hand over at construction.
#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    pub fade_tags: Vec<String>,
    pub crossfade_tags: Vec<String>,
    pub shuffle_delay_seconds: f64,
    pub shuffle_count: usize,
    pub shuffle_favorite_frequency: usize,
    pub max_peak_fps: i64,
    pub fade_seconds: i64,
    /// `None` disables the fixed peak-meter delay offset (`peak_delay_on = false`).
    pub peak_delay_ms: Option<i64>,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            fade_tags: vec!["live".into(), "medley".into(), "nonstop".into()],
            crossfade_tags: vec!["live".into()],
            shuffle_delay_seconds: DEFAULT_SHUFFLE_DELAY_SECONDS,
            shuffle_count: DEFAULT_SHUFFLE_COUNT,
            shuffle_favorite_frequency: DEFAULT_SHUFFLE_FAVORITE_FREQUENCY,
            max_peak_fps: DEFAULT_MAX_PEAK_FPS,
            fade_seconds: DEFAULT_FADE_SECONDS,
            peak_delay_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossfadeMode {
    PlayNormal,
    Crossfade,
    ShortCrossfade,
}

/// Decides how track `a` should transition into track `b`.
///
/// A bare `"*"` in the crossfade-tag set means "always crossfade"; otherwise
/// both tracks need to carry a configured tag. Either way, adjacent tracks
/// from the same album get the shorter envelope.
pub fn crossfade_mode(a: &TrackInfo, b: &TrackInfo, crossfade_tags: &[String]) -> CrossfadeMode {
    let same_album_next_track = a.album_id.is_some()
        && a.album_id == b.album_id
        && matches!((a.track_number, b.track_number), (Some(x), Some(y)) if y - x == 1);

    let wildcard = crossfade_tags.iter().any(|t| t == "*");
    let has_tag = |info: &TrackInfo| {
        info.tags
            .iter()
            .any(|t| crossfade_tags.iter().any(|c| c.eq_ignore_ascii_case(t)))
    };

    if wildcard || (has_tag(a) && has_tag(b)) {
        if same_album_next_track {
            CrossfadeMode::ShortCrossfade
        } else {
            CrossfadeMode::Crossfade
        }
    } else {
        CrossfadeMode::PlayNormal
    }
}

/// Asynchronous source of shuffled tracks, implemented by the catalog client.
/// Requests are fire-and-forget; results come back through
/// [`PlaybackController::receive_shuffle_batch`].
pub trait ShuffleSource: Send + Sync {
    fn server_count(&self) -> usize;
    fn server_has_shuffle_tags(&self, server_index: usize) -> bool;
    fn request_shuffle_batch(&self, server_index: usize, count: usize);
}

/// Equalizer configuration applied to every pipeline the controller creates
/// (each pipeline owns its own `Equalizer`, so this is reapplied on
/// construction rather than shared).
#[derive(Debug, Clone)]
pub struct EqSettings {
    pub on: bool,
    pub gains: Vec<f64>,
    pub pre_amp_db: f64,
    pub wide_stereo_delay_ms: f64,
    pub soft_clip: bool,
}

impl Default for EqSettings {
    fn default() -> Self {
        Self {
            on: false,
            gains: Vec::new(),
            pre_amp_db: 0.0,
            wide_stereo_delay_ms: 0.0,
            soft_clip: false,
        }
    }
}

impl EqSettings {
    fn apply(&self, pipeline: &TrackPipeline) {
        pipeline.set_gains(self.on, &self.gains, self.pre_amp_db);
        pipeline.set_wide_stereo_delay_ms(self.wide_stereo_delay_ms);
        pipeline.set_soft_clip(self.soft_clip);
    }
}

struct ShuffleState {
    countdown_percent: f64,
    running: bool,
    server_index: usize,
}

impl ShuffleState {
    fn new() -> Self {
        Self {
            countdown_percent: 0.0,
            running: false,
            server_index: 0,
        }
    }
}

/// Mirrors the adaptive peak-meter publication rate: the UI's self-reported
/// render lag pulls `fps` down immediately, and absent any lag it climbs
/// back up by one frame every `PEAK_FPS_INCREASE_INTERVAL_MS` worth of
/// callbacks, capped at `fps_max`.
struct PeakFpsState {
    fps: i64,
    fps_max: i64,
    callback_count: i64,
    lag_check_count: i64,
    next_increase_at: i64,
    last_lag_ms: i64,
}

impl PeakFpsState {
    fn new(fps_max: i64) -> Self {
        let fps = fps_max.max(1);
        Self {
            fps,
            fps_max,
            callback_count: 0,
            lag_check_count: ((PEAK_FPS_CHECK_INTERVAL_MS / (1000.0 / fps as f64)).round() as i64).max(1),
            next_increase_at: 0,
            last_lag_ms: 0,
        }
    }

    fn record_lag(&mut self, lag_ms: i64) {
        if lag_ms > self.last_lag_ms {
            self.last_lag_ms = lag_ms;
        }
    }

    /// Called on every peak-meter sample; returns the fps to apply to the
    /// active pipeline when it changed, `None` otherwise.
    fn on_peak_callback(&mut self) -> Option<i64> {
        self.callback_count += 1;
        let mut changed = false;

        if self.callback_count % self.lag_check_count == 0 {
            if self.last_lag_ms > 0 {
                self.fps = (1000.0 / (1000.0 / self.fps as f64 + self.last_lag_ms as f64))
                    .round()
                    .max(1.0) as i64;
                self.lag_check_count =
                    ((PEAK_FPS_CHECK_INTERVAL_MS / (1000.0 / self.fps as f64)).round() as i64).max(1);
                self.next_increase_at =
                    self.callback_count + (500.0 / (1000.0 / self.fps as f64)).round() as i64;
                self.last_lag_ms = 0;
                changed = true;
            }
        }
        if self.fps < self.fps_max && self.callback_count >= self.next_increase_at {
            self.fps += 1;
            self.next_increase_at =
                self.callback_count + (PEAK_FPS_INCREASE_INTERVAL_MS / (1000.0 / self.fps as f64)).round() as i64;
            changed = true;
        }

        changed.then_some(self.fps)
    }
}

/// Owns the playlist of not-yet-playing pipelines, the currently
/// playing/crossfading pipelines, play history, and the shuffle/peak-fps
/// policy that spans them.
pub struct PlaybackController {
    format: AudioFormat,
    event_bus: Arc<EventBus>,
    options: Mutex<PlaybackOptions>,

    current: Mutex<Option<Arc<TrackPipeline>>>,
    previous: Mutex<Option<Arc<TrackPipeline>>>,
    playlist: Mutex<VecDeque<Arc<TrackPipeline>>>,
    history: Mutex<VecDeque<TrackInfo>>,

    crossfade_in_progress: AtomicBool,
    last_position_milliseconds: AtomicI64,

    shuffle: Mutex<ShuffleState>,
    shuffle_source: Mutex<Option<Arc<dyn ShuffleSource>>>,

    peak: Mutex<PeakFpsState>,
    eq: Mutex<EqSettings>,
}

impl PlaybackController {
    pub fn new(format: AudioFormat, event_bus: Arc<EventBus>, options: PlaybackOptions) -> Arc<Self> {
        let peak = PeakFpsState::new(options.max_peak_fps);
        Arc::new(Self {
            format,
            event_bus,
            options: Mutex::new(options),
            current: Mutex::new(None),
            previous: Mutex::new(None),
            playlist: Mutex::new(VecDeque::new()),
            history: Mutex::new(VecDeque::new()),
            crossfade_in_progress: AtomicBool::new(false),
            last_position_milliseconds: AtomicI64::new(0),
            shuffle: Mutex::new(ShuffleState::new()),
            shuffle_source: Mutex::new(None),
            peak: Mutex::new(peak),
            eq: Mutex::new(EqSettings::default()),
        })
    }

    pub fn set_shuffle_source(&self, source: Arc<dyn ShuffleSource>) {
        *self.shuffle_source.lock() = Some(source);
    }

    pub fn current_track_id(&self) -> Option<String> {
        self.current.lock().as_ref().map(|t| t.id().to_string())
    }

    pub fn current_status(&self) -> PlaybackState {
        self.current
            .lock()
            .as_ref()
            .map(|t| t.status())
            .unwrap_or(PlaybackState::Idle)
    }

    fn emit(&self, event: PlayerEvent) {
        self.event_bus.emit_lossy(event);
    }

    fn new_pipeline(&self, info: TrackInfo) -> crate::error::Result<Arc<TrackPipeline>> {
        let (fade_tags, fade_seconds, peak_delay_ms) = {
            let options = self.options.lock();
            (options.fade_tags.clone(), options.fade_seconds, options.peak_delay_ms)
        };
        let pipeline = TrackPipeline::new(info, self.format.clone(), self.event_bus.clone(), &fade_tags, fade_seconds)?;
        pipeline.set_peak_delay_us(peak_delay_ms.unwrap_or(0) * 1_000);
        self.eq.lock().apply(&pipeline);
        Ok(pipeline)
    }

    /// Read-only view of the not-yet-playing queue, in play order.
    pub fn playlist_snapshot(&self) -> Vec<TrackInfo> {
        self.playlist.lock().iter().map(|t| t.info().clone()).collect()
    }

    /// Removes a queued (not currently playing) track by id.
    pub fn remove_from_playlist(&self, track_id: &str) -> bool {
        let mut playlist = self.playlist.lock();
        let before = playlist.len();
        playlist.retain(|t| t.id() != track_id);
        let removed = playlist.len() != before;
        drop(playlist);
        if removed {
            self.emit(PlayerEvent::QueueChanged {
                timestamp: chrono::Utc::now(),
            });
        }
        removed
    }

    pub fn equalizer_settings(&self) -> EqSettings {
        self.eq.lock().clone()
    }

    /// Updates the stored equalizer settings and applies them to whichever
    /// pipelines are active right now; new pipelines pick them up at
    /// construction.
    pub fn set_equalizer(&self, settings: EqSettings) {
        if let Some(track) = self.current.lock().as_ref() {
            settings.apply(track);
        }
        if let Some(track) = self.previous.lock().as_ref() {
            settings.apply(track);
        }
        *self.eq.lock() = settings;
    }

    /// Plays `info` immediately: any track presently on deck for a later
    /// crossfade is killed, the new track is pushed to the front of the
    /// playlist, and the current track is transitioned out according to the
    /// crossfade decision between it and the new track.
    pub fn play(self: &Arc<Self>, info: TrackInfo) -> crate::error::Result<()> {
        self.kill_previous();

        let track = self.new_pipeline(info)?;
        self.playlist.lock().push_front(track);
        self.emit(PlayerEvent::QueueChanged {
            timestamp: chrono::Utc::now(),
        });

        let current = self.current.lock().clone();
        match current {
            None => self.start_next_track(),
            Some(current) => {
                let incoming = self.playlist.lock().front().cloned();
                let mode = incoming
                    .as_ref()
                    .map(|next| crossfade_mode(current.info(), next.info(), &self.options.lock().crossfade_tags))
                    .unwrap_or(CrossfadeMode::PlayNormal);

                *self.previous.lock() = Some(current.clone());
                *self.current.lock() = None;

                if mode == CrossfadeMode::PlayNormal {
                    current.set_status(PlaybackState::Paused);
                }
                current.set_status(PlaybackState::Idle);
            }
        }
        Ok(())
    }

    /// Appends tracks to the back of the playlist without disturbing
    /// playback (the shuffle/enqueue path, as opposed to [`play`]).
    pub fn enqueue(&self, infos: Vec<TrackInfo>) -> crate::error::Result<()> {
        if infos.is_empty() {
            return Ok(());
        }
        for info in infos {
            let track = self.new_pipeline(info)?;
            self.playlist.lock().push_back(track);
        }
        self.emit(PlayerEvent::QueueChanged {
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }

    fn kill_previous(&self) {
        if let Some(previous) = self.previous.lock().take() {
            previous.set_status(PlaybackState::Paused);
            previous.set_status(PlaybackState::Idle);
        }
    }

    fn start_next_track(self: &Arc<Self>) {
        self.stop_shuffle_countdown();

        if self.current.lock().is_some() {
            return;
        }

        let next = self.playlist.lock().pop_front();
        let Some(next) = next else {
            self.start_shuffle_countdown();
            return;
        };

        next.set_status(PlaybackState::Playing);

        let crossfading = self
            .previous
            .lock()
            .as_ref()
            .map(|prev| crossfade_mode(prev.info(), next.info(), &self.options.lock().crossfade_tags) != CrossfadeMode::PlayNormal)
            .unwrap_or(false);
        self.crossfade_in_progress.store(crossfading, Ordering::SeqCst);

        *self.current.lock() = Some(next);
        self.emit(PlayerEvent::QueueChanged {
            timestamp: chrono::Utc::now(),
        });
    }

    pub fn next(self: &Arc<Self>) -> crate::error::Result<()> {
        let next = self.playlist.lock().pop_front();
        if let Some(next) = next {
            self.play_pipeline(next)
        } else {
            Ok(())
        }
    }

    fn play_pipeline(self: &Arc<Self>, track: Arc<TrackPipeline>) -> crate::error::Result<()> {
        self.kill_previous();

        let current = self.current.lock().clone();
        match current {
            None => {
                track.set_status(PlaybackState::Playing);
                *self.current.lock() = Some(track);
            }
            Some(current) => {
                let mode = crossfade_mode(current.info(), track.info(), &self.options.lock().crossfade_tags);
                *self.previous.lock() = Some(current.clone());
                *self.current.lock() = None;
                if mode == CrossfadeMode::PlayNormal {
                    current.set_status(PlaybackState::Paused);
                }
                current.set_status(PlaybackState::Idle);

                self.playlist.lock().push_front(track);
                self.start_next_track();
            }
        }
        Ok(())
    }

    /// Re-plays a track pulled out of history, re-queuing everything newer
    /// than it back onto the playlist in order.
    pub fn previous(self: &Arc<Self>, index: usize) -> crate::error::Result<()> {
        let entries: Vec<TrackInfo> = {
            let history = self.history.lock();
            if history.len() <= index {
                return Ok(());
            }
            history.iter().take(index + 1).cloned().collect()
        };

        let target = entries[0].clone();
        self.play(target)?;

        for info in entries[1..].iter().rev() {
            let track = self.new_pipeline(info.clone())?;
            self.playlist.lock().push_front(track);
        }
        self.emit(PlayerEvent::QueueChanged {
            timestamp: chrono::Utc::now(),
        });

        self.history.lock().drain(0..=index);
        Ok(())
    }

    pub fn play_pause_toggle(&self) {
        match self.current_status() {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused => self.resume(),
            _ => {}
        }
    }

    pub fn pause(&self) {
        if let Some(track) = self.current.lock().as_ref() {
            track.set_status(PlaybackState::Paused);
        }
    }

    pub fn resume(&self) {
        if let Some(track) = self.current.lock().as_ref() {
            track.set_status(PlaybackState::Playing);
        }
    }

    pub fn seek(&self, percent: f64) {
        if let Some(track) = self.current.lock().as_ref() {
            track.set_position(percent);
        }
    }

    pub fn stop(&self) {
        self.stop_shuffle_countdown();
        self.kill_previous();
        if let Some(track) = self.current.lock().take() {
            track.set_status(PlaybackState::Paused);
            track.set_status(PlaybackState::Idle);
        }
        self.playlist.lock().clear();
        self.emit(PlayerEvent::QueueChanged {
            timestamp: chrono::Utc::now(),
        });
    }

    /// Must be called whenever a pipeline reports `Finished`: moves it to
    /// history and advances the playlist.
    pub fn on_track_finished(self: &Arc<Self>, track_id: &str) {
        let mut finished_one = false;

        if self.previous.lock().as_ref().is_some_and(|t| t.id() == track_id) {
            if let Some(track) = self.previous.lock().take() {
                self.history.lock().push_front(track.info().clone());
            }
            finished_one = true;
        }

        if self.current.lock().as_ref().is_some_and(|t| t.id() == track_id) {
            if let Some(track) = self.current.lock().take() {
                self.history.lock().push_front(track.info().clone());
            }
            finished_one = true;
        }

        self.playlist.lock().retain(|t| t.id() != track_id);

        if finished_one {
            self.start_next_track();
        }

        let playlist_empty = self.playlist.lock().is_empty();
        if finished_one && playlist_empty && self.shuffle_source.lock().is_some() {
            self.start_shuffle_countdown();
        }
    }

    /// Must be called whenever a pipeline reports `FadeoutStarted`: if its
    /// id matches the current track and the next queued track crossfades
    /// with it, cuts over immediately instead of waiting for `Finished`.
    pub fn on_fadeout_started(self: &Arc<Self>, track_id: &str) {
        let is_current = self
            .current
            .lock()
            .as_ref()
            .is_some_and(|t| t.id() == track_id);
        if !is_current {
            return;
        }

        let next = self.playlist.lock().front().cloned();
        let Some(next) = next else { return };

        let current = self.current.lock().clone();
        let Some(current) = current else { return };

        if crossfade_mode(current.info(), next.info(), &self.options.lock().crossfade_tags) == CrossfadeMode::PlayNormal {
            return;
        }

        self.kill_previous();
        *self.previous.lock() = Some(current);
        *self.current.lock() = None;
        self.start_next_track();
    }

    /// Must be called on every `PositionChanged` from the current pipeline:
    /// records the position and pre-decodes the next queued track once it
    /// is within its fade-in lead time of the current track ending.
    pub fn on_position_changed(&self, track_id: &str, position_ms: i64) {
        let is_current = self
            .current
            .lock()
            .as_ref()
            .is_some_and(|t| t.id() == track_id);
        if !is_current {
            return;
        }
        self.last_position_milliseconds.store(position_ms, Ordering::SeqCst);

        let current = self.current.lock().clone();
        let Some(current) = current else { return };
        let remaining_ms = current.length_milliseconds() - position_ms;

        let next = self.playlist.lock().front().cloned();
        let Some(next) = next else { return };
        if next.status() != PlaybackState::Idle {
            return;
        }

        let next_fade_in_ms = next.info().fade_duration_seconds.unwrap_or(4) * 1000;
        if remaining_ms <= PRE_DECODE_LOOKAHEAD_MS + next_fade_in_ms {
            next.set_status(PlaybackState::Decoding);
        }
    }

    pub fn last_position_milliseconds(&self) -> i64 {
        self.last_position_milliseconds.load(Ordering::SeqCst)
    }

    // --- Shuffle scheduling -------------------------------------------------

    fn start_shuffle_countdown(&self) {
        let delay = self.options.lock().shuffle_delay_seconds;
        let mut shuffle = self.shuffle.lock();
        if shuffle.running {
            return;
        }
        if delay <= 0.0 {
            drop(shuffle);
            self.start_shuffle_batch();
            return;
        }
        shuffle.running = true;
        shuffle.countdown_percent = 1.0;
    }

    fn stop_shuffle_countdown(&self) {
        let mut shuffle = self.shuffle.lock();
        shuffle.running = false;
        shuffle.countdown_percent = 0.0;
    }

    /// Ticks the shuffle countdown by one second; call this from a 1 Hz
    /// timer while it is running. Starts a shuffle batch once it reaches 0.
    pub fn tick_shuffle_countdown(&self) {
        let delay = self.options.lock().shuffle_delay_seconds;
        let expired = {
            let mut shuffle = self.shuffle.lock();
            if !shuffle.running {
                return;
            }
            shuffle.countdown_percent -= 1.0 / delay.max(1.0);
            shuffle.countdown_percent <= 0.0
        };
        if expired {
            self.stop_shuffle_countdown();
            self.start_shuffle_batch();
        }
    }

    fn start_shuffle_batch(&self) {
        let Some(source) = self.shuffle_source.lock().clone() else {
            return;
        };
        let server_count = source.server_count();
        if server_count == 0 {
            return;
        }

        let any_has_shuffle_tags = (0..server_count).any(|i| source.server_has_shuffle_tags(i));
        let mut shuffle = self.shuffle.lock();
        if any_has_shuffle_tags {
            while !source.server_has_shuffle_tags(shuffle.server_index) {
                shuffle.server_index = (shuffle.server_index + 1) % server_count;
            }
        }
        let server_index = shuffle.server_index;
        shuffle.server_index = (shuffle.server_index + 1) % server_count;
        drop(shuffle);

        let count = self.options.lock().shuffle_count;
        source.request_shuffle_batch(server_index, count);
    }

    /// Delivers the result of a previously-requested shuffle batch; the
    /// favorite-substitution interleave already happened in the catalog
    /// client (§4.10), so the controller just enqueues what it is given.
    pub fn receive_shuffle_batch(&self, tracks: Vec<TrackInfo>) -> crate::error::Result<()> {
        self.enqueue(tracks)
    }

    // --- Peak-meter FPS adaptation ------------------------------------------

    /// Call on every UI-reported render lag sample; takes effect on the
    /// next batch of peak-callback observations, not immediately.
    pub fn peak_ui_lag(&self, lag_ms: i64) {
        self.peak.lock().record_lag(lag_ms);
    }

    /// Call once per peak-meter sample observed from the active pipeline;
    /// adjusts and applies the publication rate when it changes.
    pub fn on_peak_callback(&self) {
        let new_fps = self.peak.lock().on_peak_callback();
        if let Some(fps) = new_fps {
            if let Some(track) = self.current.lock().as_ref() {
                track.set_peak_fps(fps.max(1) as u32);
            }
            if let Some(track) = self.previous.lock().as_ref() {
                track.set_peak_fps(fps.max(1) as u32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, album_id: Option<&str>, track_number: Option<i32>, tags: &[&str]) -> TrackInfo {
        TrackInfo {
            id: id.into(),
            url: format!("file:///tmp/{id}.wav"),
            title: id.into(),
            artist: "Artist".into(),
            album: "Album".into(),
            album_id: album_id.map(|s| s.to_string()),
            track_number,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            length_milliseconds: Some(10_000),
            fade_duration_seconds: None,
            radio_station: false,
            favorite: false,
        }
    }

    #[test]
    fn crossfade_mode_is_play_normal_without_matching_tags() {
        let a = track("a", None, None, &[]);
        let b = track("b", None, None, &[]);
        assert_eq!(crossfade_mode(&a, &b, &["live".into()]), CrossfadeMode::PlayNormal);
    }

    #[test]
    fn crossfade_mode_is_crossfade_when_both_tagged() {
        let a = track("a", None, None, &["live"]);
        let b = track("b", None, None, &["live"]);
        assert_eq!(crossfade_mode(&a, &b, &["live".into()]), CrossfadeMode::Crossfade);
    }

    #[test]
    fn crossfade_mode_is_short_for_adjacent_album_tracks() {
        let a = track("a", Some("alb1"), Some(3), &["live"]);
        let b = track("b", Some("alb1"), Some(4), &["live"]);
        assert_eq!(crossfade_mode(&a, &b, &["live".into()]), CrossfadeMode::ShortCrossfade);
    }

    #[test]
    fn crossfade_mode_wildcard_always_crossfades() {
        let a = track("a", None, None, &[]);
        let b = track("b", None, None, &[]);
        assert_eq!(crossfade_mode(&a, &b, &["*".into()]), CrossfadeMode::Crossfade);
    }

    #[test]
    fn peak_fps_state_backs_off_on_reported_lag() {
        let mut state = PeakFpsState::new(25);
        let initial_fps = state.fps;
        state.record_lag(50);
        let mut changed_fps = None;
        for _ in 0..state.lag_check_count {
            if let Some(fps) = state.on_peak_callback() {
                changed_fps = Some(fps);
            }
        }
        assert!(changed_fps.unwrap() < initial_fps);
    }

    fn test_format() -> AudioFormat {
        AudioFormat::CD_QUALITY
    }

    #[test]
    fn play_with_empty_playlist_starts_immediately() {
        let bus = Arc::new(EventBus::new(16));
        let controller = PlaybackController::new(test_format(), bus, PlaybackOptions::default());
        controller.play(track("a", None, None, &[])).unwrap();
        assert_eq!(controller.current_track_id().as_deref(), Some("a"));
        assert_eq!(controller.current_status(), PlaybackState::Playing);
    }

    #[test]
    fn on_track_finished_advances_playlist() {
        let bus = Arc::new(EventBus::new(16));
        let controller = PlaybackController::new(test_format(), bus, PlaybackOptions::default());
        controller.play(track("a", None, None, &[])).unwrap();
        controller.enqueue(vec![track("b", None, None, &[])]).unwrap();

        controller.on_track_finished("a");

        assert_eq!(controller.current_track_id().as_deref(), Some("b"));
        assert_eq!(controller.history.lock().len(), 1);
    }

    #[test]
    fn shuffle_countdown_expires_and_requests_a_batch() {
        struct Requested(Mutex<Option<(usize, usize)>>);
        impl ShuffleSource for Requested {
            fn server_count(&self) -> usize {
                1
            }
            fn server_has_shuffle_tags(&self, _server_index: usize) -> bool {
                false
            }
            fn request_shuffle_batch(&self, server_index: usize, count: usize) {
                *self.0.lock() = Some((server_index, count));
            }
        }

        let bus = Arc::new(EventBus::new(16));
        let mut options = PlaybackOptions::default();
        options.shuffle_delay_seconds = 1.0;
        let controller = PlaybackController::new(test_format(), bus, options);

        let source = Arc::new(Requested(Mutex::new(None)));
        controller.set_shuffle_source(source.clone());

        controller.start_shuffle_countdown();
        controller.tick_shuffle_countdown();

        assert_eq!(*source.0.lock(), Some((0, DEFAULT_SHUFFLE_COUNT)));
    }
}
