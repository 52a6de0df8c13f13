//! End-to-end orchestration
//!
//! Two entry paths converge on the same frame-record schema:
//!
//! * video ingestion: quality gate, then landmark signal extraction,
//!   producing a usability verdict plus frame records;
//! * archived exports: the adapter in [`crate::adapters`] loads records
//!   directly.
//!
//! From records onward everything is shared: windowing and features,
//! the sequence dataset, the autoencoder, and calibration scoring.
//! [`fit_screening`] runs the offline flow (discover sessions, cache
//! features, split by user, train, calibrate); [`ScreeningEngine`] is
//! the serving side implementing the request/response contract.

use crate::adapters::{discover_user_sessions, load_dream_sequence};
use crate::cache::FeatureCache;
use crate::calibration::CalibrationRecord;
use crate::error::ScreenError;
use crate::features::extract_features;
use crate::model::dataset::DEFAULT_SEQ_LEN;
use crate::model::train::{reconstruction_errors, train, EpochStats, TrainConfig};
use crate::model::{
    ModelConfig, SimpleRng, StandardScaler, TcnAutoencoder, WindowSequenceDataset,
};
use crate::quality::{build_validity_mask, evaluate_usability, GateConfig, LumaFrame};
use crate::signal::extract_frame_records;
use crate::source::LandmarkSource;
use crate::types::{
    FrameRecord, InferenceMeta, InferenceRequest, InferenceResponse, InferenceStatus,
    UsabilityVerdict, FEATURE_KEYS,
};
use crate::window::WindowConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// User-level split fractions. Calibration and test each take this
/// share; training takes the remainder.
const CAL_FRACTION: f64 = 0.15;
const TEST_FRACTION: f64 = 0.15;

/// Knobs for the offline fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub window: WindowConfig,
    pub model: ModelConfig,
    pub train: TrainConfig,
    pub seq_len: usize,
    /// Seed for the user-level split shuffle.
    pub split_seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            model: ModelConfig::default(),
            train: TrainConfig::default(),
            seq_len: DEFAULT_SEQ_LEN,
            split_seed: 7,
        }
    }
}

/// Gate raw frames and extract landmark records in one pass.
///
/// Face counts come from the landmark source's face detector; the cheap
/// gating pass runs first, and when the verdict is unusable no pose
/// extraction is done and the record list is empty.
pub fn ingest_video(
    frames: &[LumaFrame],
    timestamps: &[f64],
    source: &mut dyn LandmarkSource,
    gate: &GateConfig,
) -> (UsabilityVerdict, Vec<FrameRecord>) {
    let face_counts: Vec<u32> = frames.iter().map(|f| source.face_count(f)).collect();
    let (mask, stats) = build_validity_mask(frames, &face_counts);
    let verdict = evaluate_usability(&mask, &stats, gate);
    if !verdict.usable {
        return (verdict, Vec::new());
    }
    let records = extract_frame_records(frames, &mask, timestamps, source);
    (verdict, records)
}

/// Approximate frame rate from record timestamps. Exports always carry
/// monotonically increasing times; falls back to 25 fps when the
/// sequence is too short to tell.
pub fn estimate_fps(records: &[FrameRecord]) -> f64 {
    if records.len() < 2 {
        return 25.0;
    }
    let span = records[records.len() - 1].t - records[0].t;
    if span <= 0.0 {
        return 25.0;
    }
    (records.len() - 1) as f64 / span
}

/// How users were divided for one fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSummary {
    pub train_users: Vec<String>,
    pub calibration_users: Vec<String>,
    pub test_users: Vec<String>,
    /// Session files that failed to parse and were skipped.
    pub skipped_sessions: Vec<String>,
}

/// Output of the offline fit.
#[derive(Debug)]
pub struct FittedScreening {
    pub model: TcnAutoencoder,
    pub calibration: CalibrationRecord,
    pub history: Vec<EpochStats>,
    pub split: SplitSummary,
}

/// Assign whole users to train/calibration/test. Every user's sessions
/// land in exactly one split, so no identity leaks across them.
fn split_users(user_ids: &[String], seed: u64) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut shuffled: Vec<String> = user_ids.to_vec();
    let mut rng = SimpleRng::new(seed);
    rng.shuffle(&mut shuffled);

    let n = shuffled.len();
    let n_cal = (((n as f64) * CAL_FRACTION).round() as usize).max(1).min(n.saturating_sub(1));
    let n_test = (((n as f64) * TEST_FRACTION).round() as usize).min(n.saturating_sub(n_cal + 1));

    let test = shuffled.split_off(n - n_test);
    let cal = shuffled.split_off(shuffled.len() - n_cal);
    (shuffled, cal, test)
}

/// Window features for one session file, by way of the cache.
fn session_features(
    path: &Path,
    cache: &dyn FeatureCache,
    window: &WindowConfig,
) -> Result<Vec<crate::types::FeatureVector>, ScreenError> {
    // Sessions from different users share file names; the key must
    // carry the user directory.
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("session");
    let user = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or("");
    let key = if user.is_empty() {
        stem.to_string()
    } else {
        format!("{}-{}", user, stem)
    };

    if let Some(hit) = cache.get(&key)? {
        return Ok(hit);
    }

    let records = load_dream_sequence(path)?;
    let fps = estimate_fps(&records);
    let features = extract_features(&records, fps, window, None)?;
    cache.put(&key, &features)?;
    Ok(features)
}

/// Discover sessions, split by user, train the model on the training
/// split, and calibrate on the held-out calibration split. The test
/// split is reserved untouched for external evaluation.
pub fn fit_screening(
    data_root: &Path,
    cache: &dyn FeatureCache,
    cfg: &PipelineConfig,
) -> Result<FittedScreening, ScreenError> {
    let users = discover_user_sessions(data_root)?;
    if users.len() < 2 {
        return Err(ScreenError::InsufficientData(format!(
            "found {} users, need at least 2 for a split",
            users.len()
        )));
    }

    let user_ids: Vec<String> = users.iter().map(|(id, _)| id.clone()).collect();
    let (train_users, cal_users, test_users) = split_users(&user_ids, cfg.split_seed);

    let mut skipped: Vec<String> = Vec::new();
    let mut collect = |wanted: &[String]| -> Result<Vec<Vec<crate::types::FeatureVector>>, ScreenError> {
        let mut out = Vec::new();
        for (user, sessions) in &users {
            if !wanted.contains(user) {
                continue;
            }
            for session in sessions {
                match session_features(session, cache, &cfg.window) {
                    Ok(features) => out.push(features),
                    Err(ScreenError::ParseError(_)) => {
                        skipped.push(session.display().to_string())
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(out)
    };

    let train_sessions = collect(&train_users)?;
    let cal_sessions = collect(&cal_users)?;

    // The scaler sees training windows only.
    let train_rows: Vec<Vec<f64>> = train_sessions
        .iter()
        .flatten()
        .map(|f| f.to_vec())
        .collect();
    let scaler = StandardScaler::fit(&train_rows)?;

    let mut build = |sessions: &[Vec<crate::types::FeatureVector>]| -> Result<WindowSequenceDataset, ScreenError> {
        let parts: Vec<WindowSequenceDataset> = sessions
            .iter()
            .filter(|f| f.len() >= cfg.seq_len)
            .map(|f| WindowSequenceDataset::from_features(f, &scaler, cfg.seq_len))
            .collect::<Result<_, _>>()?;
        WindowSequenceDataset::merge(parts)
    };

    let train_set = build(&train_sessions)?;
    let cal_set = build(&cal_sessions)?;

    let mut model = TcnAutoencoder::new(cfg.model.clone(), cfg.train.seed);
    let history = train(&mut model, &train_set, &cfg.train)?;

    let cal_errors = reconstruction_errors(&model, cal_set.sequences())?;
    let schema = FEATURE_KEYS.iter().map(|k| k.to_string()).collect();
    let calibration = CalibrationRecord::fit(&cal_errors, scaler, schema, cfg.seq_len)?;

    Ok(FittedScreening {
        model,
        calibration,
        history,
        split: SplitSummary {
            train_users,
            calibration_users: cal_users,
            test_users,
            skipped_sessions: skipped,
        },
    })
}

/// The serving side: a trained model plus its calibration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningEngine {
    model: TcnAutoencoder,
    calibration: CalibrationRecord,
    window: WindowConfig,
}

impl ScreeningEngine {
    pub fn new(model: TcnAutoencoder, calibration: CalibrationRecord, window: WindowConfig) -> Self {
        Self {
            model,
            calibration,
            window,
        }
    }

    pub fn calibration(&self) -> &CalibrationRecord {
        &self.calibration
    }

    /// Score one request.
    ///
    /// Sequences too short to window, or with too few windows for one
    /// model input, answer `waiting_for_more_data` rather than erroring;
    /// the caller is expected to accumulate frames and retry. Unknown
    /// task names and shape mismatches are hard errors.
    pub fn score(&self, request: &InferenceRequest) -> Result<InferenceResponse, ScreenError> {
        let features = extract_features(
            &request.sequence,
            request.fps,
            &self.window,
            request.task.as_deref(),
        )?;
        let meta = InferenceMeta {
            frames_processed: request.sequence.len() as u32,
            windows_generated: features.len() as u32,
        };

        if features.len() < self.calibration.seq_len {
            return Ok(InferenceResponse {
                status: InferenceStatus::WaitingForMoreData,
                score: None,
                meta,
            });
        }

        let dataset = WindowSequenceDataset::from_features(
            &features,
            &self.calibration.scaler,
            self.calibration.seq_len,
        )?;
        let errors = reconstruction_errors(&self.model, dataset.sequences())?;
        let score = self.calibration.score(&errors)?;

        Ok(InferenceResponse {
            status: InferenceStatus::Scored,
            score: Some(score),
            meta,
        })
    }

    /// Persist the engine as a single JSON file, atomically.
    pub fn save(&self, path: &Path) -> Result<(), ScreenError> {
        let json = serde_json::to_string(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ScreenError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
