//! Per-window feature computation
//!
//! Deterministic statistical descriptors over accepted windows: motion
//! energy, bilateral wrist symmetry, gaze stability, and head motion,
//! plus an optional task one-hot. Every reduction over possibly-missing
//! data drops the missing values first and returns a neutral 0.0 when
//! nothing remains, never NaN.

use crate::error::ScreenError;
use crate::types::{FeatureVector, FrameRecord, TaskContext};
use crate::window::{interpolate_short_gaps, sliding_windows, Window, WindowConfig};

/// Maximum missing-run length filled by interpolation before statistics.
const INTERP_GAP_LIMIT: usize = 3;

/// Mean of the present values; 0.0 when all are missing.
fn safe_mean(values: &[Option<f64>]) -> f64 {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        return 0.0;
    }
    present.iter().sum::<f64>() / present.len() as f64
}

/// Population variance of the present values; 0.0 when all are missing.
fn safe_var(values: &[Option<f64>]) -> f64 {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if present.is_empty() {
        return 0.0;
    }
    let mean = present.iter().sum::<f64>() / present.len() as f64;
    present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / present.len() as f64
}

/// Population standard deviation; 0.0 when all values are missing.
fn safe_std(values: &[Option<f64>]) -> f64 {
    safe_var(values).sqrt()
}

/// Maximum of the present values; 0.0 when all are missing.
fn safe_max(values: &[Option<f64>]) -> f64 {
    values
        .iter()
        .filter_map(|v| *v)
        .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
        .unwrap_or(0.0)
}

/// One (x, y, z) channel triple across the window for a single joint,
/// with short gaps interpolated.
fn joint_channels(window: &Window, joint_index: usize) -> [Vec<Option<f64>>; 3] {
    let mut xs = Vec::with_capacity(window.frames.len());
    let mut ys = Vec::with_capacity(window.frames.len());
    let mut zs = Vec::with_capacity(window.frames.len());

    for frame in &window.frames {
        match frame.usable_pose() {
            Some(pose) => {
                let p = pose.upper_body()[joint_index];
                xs.push(Some(p.x));
                ys.push(Some(p.y));
                zs.push(Some(p.z));
            }
            None => {
                xs.push(None);
                ys.push(None);
                zs.push(None);
            }
        }
    }

    interpolate_short_gaps(&mut xs, INTERP_GAP_LIMIT);
    interpolate_short_gaps(&mut ys, INTERP_GAP_LIMIT);
    interpolate_short_gaps(&mut zs, INTERP_GAP_LIMIT);
    [xs, ys, zs]
}

/// Frame-to-frame Euclidean speed of each upper-body joint, averaged
/// across joints, reduced to mean/std/max over time.
fn motion_energy(window: &Window) -> (f64, f64, f64) {
    const NUM_JOINTS: usize = 6;
    let steps = window.frames.len().saturating_sub(1);
    if steps == 0 {
        return (0.0, 0.0, 0.0);
    }

    // speeds[joint][t]: None when either endpoint of the diff is missing.
    let mut speeds: Vec<Vec<Option<f64>>> = Vec::with_capacity(NUM_JOINTS);
    for joint in 0..NUM_JOINTS {
        let [xs, ys, zs] = joint_channels(window, joint);
        let mut joint_speed = Vec::with_capacity(steps);
        for t in 0..steps {
            let v = match (xs[t], xs[t + 1], ys[t], ys[t + 1], zs[t], zs[t + 1]) {
                (Some(x0), Some(x1), Some(y0), Some(y1), Some(z0), Some(z1)) => {
                    let (dx, dy, dz) = (x1 - x0, y1 - y0, z1 - z0);
                    Some((dx * dx + dy * dy + dz * dz).sqrt())
                }
                _ => None,
            };
            joint_speed.push(v);
        }
        speeds.push(joint_speed);
    }

    // Mean speed across joints per timestep, missing-safe per step.
    let mean_speed: Vec<Option<f64>> = (0..steps)
        .map(|t| {
            let step: Vec<Option<f64>> = speeds.iter().map(|s| s[t]).collect();
            if step.iter().all(|v| v.is_none()) {
                None
            } else {
                Some(safe_mean(&step))
            }
        })
        .collect();

    (
        safe_mean(&mean_speed),
        safe_std(&mean_speed),
        safe_max(&mean_speed),
    )
}

/// Per-frame distance between left and right wrist, reduced to mean/std.
fn arm_symmetry(window: &Window) -> (f64, f64) {
    let dists: Vec<Option<f64>> = window
        .frames
        .iter()
        .map(|frame| {
            frame
                .usable_pose()
                .map(|pose| pose.left_wrist.distance(&pose.right_wrist))
        })
        .collect();

    (safe_mean(&dists), safe_std(&dists))
}

/// Variance of gaze x/y across the window, over non-missing samples only.
fn gaze_stability(window: &Window) -> (f64, f64) {
    let gx: Vec<Option<f64>> = window
        .frames
        .iter()
        .map(|f| f.usable_gaze().map(|g| g.gx))
        .collect();
    let gy: Vec<Option<f64>> = window
        .frames
        .iter()
        .map(|f| f.usable_gaze().map(|g| g.gy))
        .collect();

    (safe_var(&gx), safe_var(&gy))
}

/// Standard deviation of head yaw and pitch across the window.
fn head_motion(window: &Window) -> (f64, f64) {
    let yaw: Vec<Option<f64>> = window
        .frames
        .iter()
        .map(|f| f.usable_head().map(|h| h.yaw))
        .collect();
    let pitch: Vec<Option<f64>> = window
        .frames
        .iter()
        .map(|f| f.usable_head().map(|h| h.pitch))
        .collect();

    (safe_std(&yaw), safe_std(&pitch))
}

/// Compute the fixed-schema feature vector for one accepted window.
pub fn window_features(window: &Window, task: Option<TaskContext>) -> FeatureVector {
    let (motion_mean, motion_std, motion_max) = motion_energy(window);
    let (lr_mean_dist, lr_std_dist) = arm_symmetry(window);
    let (gaze_var_x, gaze_var_y) = gaze_stability(window);
    let (yaw_std, pitch_std) = head_motion(window);

    FeatureVector {
        motion_mean,
        motion_std,
        motion_max,
        lr_mean_dist,
        lr_std_dist,
        gaze_var_x,
        gaze_var_y,
        yaw_std,
        pitch_std,
        task,
    }
}

/// Window a sequence and compute one feature vector per accepted window.
///
/// `task_name`, when present, must be one of the structured task names;
/// anything else is a hard [`ScreenError::UnknownTask`], since it
/// indicates caller misuse rather than data quality.
pub fn extract_features(
    sequence: &[FrameRecord],
    fps: f64,
    cfg: &WindowConfig,
    task_name: Option<&str>,
) -> Result<Vec<FeatureVector>, ScreenError> {
    let task = match task_name {
        Some(name) => Some(TaskContext::from_name(name)?),
        None => None,
    };

    let windows = sliding_windows(
        sequence,
        cfg.window_frames(fps),
        cfg.stride_frames(fps),
        cfg.max_gap,
    );

    Ok(windows.iter().map(|w| window_features(w, task)).collect())
}
