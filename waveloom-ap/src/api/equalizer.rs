//! Equalizer gain get/set, backed by the controller's persisted settings.

use crate::controller::EqSettings;
use crate::state::SharedState;
use axum::extract::State;
use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct EqualizerView {
    pub on: bool,
    pub gains: Vec<f64>,
    pub pre_amp_db: f64,
    pub wide_stereo_delay_ms: f64,
    pub soft_clip: bool,
}

impl From<EqSettings> for EqualizerView {
    fn from(s: EqSettings) -> Self {
        Self {
            on: s.on,
            gains: s.gains,
            pre_amp_db: s.pre_amp_db,
            wide_stereo_delay_ms: s.wide_stereo_delay_ms,
            soft_clip: s.soft_clip,
        }
    }
}

impl From<EqualizerView> for EqSettings {
    fn from(v: EqualizerView) -> Self {
        Self {
            on: v.on,
            gains: v.gains,
            pre_amp_db: v.pre_amp_db,
            wide_stereo_delay_ms: v.wide_stereo_delay_ms,
            soft_clip: v.soft_clip,
        }
    }
}

pub async fn get_equalizer(State(state): State<SharedState>) -> Json<EqualizerView> {
    Json(state.controller.equalizer_settings().into())
}

pub async fn set_equalizer(
    State(state): State<SharedState>,
    Json(view): Json<EqualizerView>,
) -> StatusCode {
    state.controller.set_equalizer(view.into());
    StatusCode::NO_CONTENT
}
