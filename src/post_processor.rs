use std::path::Path;

use log::{debug, info, warn};

use crate::{
    datatypes::{HistoryCurve, ParameterVector, ReportRecord},
    error::{DetectError, WaterbombError},
    report,
};

/// Fraction of the derivative series a snap-through must start after
pub const MIN_ONSET_FRACTION: f64 = 0.25;

/// Location and size of a detected snap-through
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapThrough {
    /// Last non-negative slope before the final negative run
    pub start: usize,
    /// Last negative slope
    pub end: usize,
    /// Relative strain energy drop
    pub delta: f64,
}

/// Discrete slope of the energy history. The last sample pair is not used,
/// so the series has `energy.len() - 2` entries.
pub fn derivative_series(displacement: &[f64], energy: &[f64]) -> Vec<f64> {
    (0..energy.len().saturating_sub(2))
        .map(|i| (energy[i + 1] - energy[i]) / (displacement[i + 1] - displacement[i]))
        .collect()
}

/// Locates the final negative-slope run of a strain energy history
///
/// # Arguments
/// * `displacement` - Frame values of the analysis step
/// * `energy` - Whole-model strain energy at each frame
///
/// # Returns
/// The snap-through bounds and its energy drop fraction
pub fn detect(displacement: &[f64], energy: &[f64]) -> Result<SnapThrough, DetectError> {
    if displacement.len() != energy.len() {
        return Err(DetectError::InvalidCurve(format!(
            "{} displacement samples for {} energy samples",
            displacement.len(),
            energy.len()
        )));
    }
    if energy.len() < 3 {
        return Err(DetectError::InvalidCurve(format!(
            "need at least 3 samples, got {}",
            energy.len()
        )));
    }

    let derivative = derivative_series(displacement, energy);
    if let Some(frame) = derivative.iter().position(|d| !d.is_finite()) {
        return Err(DetectError::DegenerateCurve(format!(
            "non-finite slope at frame {frame}"
        )));
    }

    let end = derivative
        .iter()
        .rposition(|d| *d < 0.0)
        .ok_or(DetectError::NoSnapThroughFound)?;

    // A negative run reaching back to the first frame has no onset
    let start = derivative[..end]
        .iter()
        .rposition(|d| *d >= 0.0)
        .ok_or(DetectError::NoSnapThroughFound)?;

    if start as f64 / derivative.len() as f64 <= MIN_ONSET_FRACTION {
        return Err(DetectError::TooEarly {
            start,
            len: derivative.len(),
        });
    }

    let reference = energy[start + 2];
    if reference == 0.0 {
        return Err(DetectError::DegenerateCurve(format!(
            "zero reference energy at frame {}",
            start + 2
        )));
    }

    let delta = (reference - energy[end + 1]) / reference;
    if !delta.is_finite() {
        return Err(DetectError::DegenerateCurve(format!(
            "energy drop evaluates to {delta}"
        )));
    }

    Ok(SnapThrough { start, end, delta })
}

/// Energy drop of a history, or `-inf` when there is no usable snap-through
pub fn snap_through_delta(curve: &HistoryCurve) -> f64 {
    match detect(&curve.displacement, &curve.energy) {
        Ok(snap) => {
            debug!(
                "snap-through between frames {} and {}: delta = {}",
                snap.start, snap.end, snap.delta
            );
            snap.delta
        }
        Err(err) => {
            warn!("no snap-through: {err}");
            f64::NEG_INFINITY
        }
    }
}

/// Parses an exported history curve
///
/// Each line holds `displacement,energy` (tabs or spaces also accepted).
/// Blank lines and `#` comments are skipped. The first other line may be a
/// non-numeric header; any later non-numeric line is an error.
///
/// # Arguments
/// * `curve_file` - Path to the exported history
pub fn load_curve(curve_file: &Path) -> Result<HistoryCurve, WaterbombError> {
    let contents = match std::fs::read_to_string(curve_file) {
        Ok(c) => c,
        Err(err) => {
            return Err(WaterbombError::Input(format!(
                "Unable to open history curve {}: {err}",
                curve_file.display()
            )))
        }
    };

    let mut displacement: Vec<f64> = Vec::new();
    let mut energy: Vec<f64> = Vec::new();
    let mut first_line = true;

    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let may_be_header = std::mem::replace(&mut first_line, false);

        let fields: Vec<&str> = if line.contains(',') {
            line.split(',').map(str::trim).collect()
        } else {
            line.split_whitespace().collect()
        };
        if fields.len() != 2 {
            return Err(WaterbombError::Parse(format!(
                "{}:{}: expected 2 columns, found {}",
                curve_file.display(),
                line_no + 1,
                fields.len()
            )));
        }

        match (fields[0].parse::<f64>(), fields[1].parse::<f64>()) {
            (Ok(d), Ok(e)) => {
                displacement.push(d);
                energy.push(e);
            }
            _ if may_be_header => continue,
            _ => {
                return Err(WaterbombError::Parse(format!(
                    "{}:{}: non-numeric sample '{line}'",
                    curve_file.display(),
                    line_no + 1
                )))
            }
        }
    }

    HistoryCurve::new(displacement, energy)
}

/// Computes the energy drop of one solve and appends it to the report
///
/// # Arguments
/// * `curve_file` - Exported strain energy history of the solve
/// * `params` - The design that was solved
/// * `report_file` - The experiment report
///
/// # Returns
/// The delta written to the report
pub fn post_process(
    curve_file: &Path,
    params: &ParameterVector,
    report_file: &Path,
) -> Result<f64, WaterbombError> {
    let curve = load_curve(curve_file)?;
    info!(
        "loaded {} history frames from {}",
        curve.len(),
        curve_file.display()
    );

    let delta = snap_through_delta(&curve);
    report::append_record(
        report_file,
        &ReportRecord {
            params: *params,
            delta,
        },
    )?;

    info!("{params} -> delta = {delta}");
    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    use approx::assert_relative_eq;

    fn frames(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn derivative_drops_last_sample() {
        let d = derivative_series(&[0.0, 1.0, 2.0, 3.0], &[0.0, 2.0, 3.0, 10.0]);
        assert_eq!(d, vec![2.0, 1.0]);
    }

    #[test]
    fn finds_late_snap_through() {
        let energy = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 3.0, 2.0, 4.0, 6.0];
        let snap = detect(&frames(10), &energy).unwrap();

        assert_eq!(snap.start, 4);
        assert_eq!(snap.end, 6);
        assert_relative_eq!(snap.delta, (energy[6] - energy[7]) / energy[6]);
        assert_relative_eq!(snap.delta, 1.0 / 3.0);
    }

    #[test]
    fn uses_final_negative_run() {
        let energy = [0.0, 1.0, 0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 3.0, 2.0, 4.0];
        let snap = detect(&frames(11), &energy).unwrap();

        assert_eq!(snap.end, 8);
        assert_eq!(snap.start, 6);
        assert_relative_eq!(snap.delta, 1.0 / 3.0);
    }

    #[test]
    fn monotonic_curve_has_no_snap_through() {
        let energy = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(
            detect(&frames(6), &energy),
            Err(DetectError::NoSnapThroughFound)
        );
    }

    #[test]
    fn early_snap_through_is_rejected() {
        let energy = [0.0, 2.0, 1.0, 0.5, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(
            detect(&frames(10), &energy),
            Err(DetectError::TooEarly { start: 0, len: 8 })
        );
    }

    #[test]
    fn onset_at_exactly_a_quarter_is_rejected() {
        let energy = [0.0, 1.0, 2.0, 3.0, 1.0, 0.5, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(
            detect(&frames(10), &energy),
            Err(DetectError::TooEarly { start: 2, len: 8 })
        );
    }

    #[test]
    fn run_reaching_first_frame_has_no_onset() {
        let energy = [10.0, 9.0, 7.0, 8.0, 9.0, 11.0];
        assert_eq!(
            detect(&frames(6), &energy),
            Err(DetectError::NoSnapThroughFound)
        );
    }

    #[test]
    fn zero_reference_energy_is_degenerate() {
        let energy = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 0.0, -1.0, 4.0, 6.0];
        assert!(matches!(
            detect(&frames(10), &energy),
            Err(DetectError::DegenerateCurve(_))
        ));
    }

    #[test]
    fn repeated_frame_is_degenerate() {
        let displacement = [0.0, 1.0, 1.0, 2.0];
        let energy = [0.0, 1.0, 2.0, 3.0];
        assert!(matches!(
            detect(&displacement, &energy),
            Err(DetectError::DegenerateCurve(_))
        ));
    }

    #[test]
    fn short_curve_is_invalid() {
        assert!(matches!(
            detect(&[0.0, 1.0], &[1.0, 0.0]),
            Err(DetectError::InvalidCurve(_))
        ));
    }

    #[test]
    fn failures_collapse_to_negative_infinity() {
        let curve = HistoryCurve::new(frames(4), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(snap_through_delta(&curve), f64::NEG_INFINITY);
    }

    #[test]
    fn loads_curve_with_header_and_comments() {
        let dir = scratch_dir("curve");
        let path = dir.join("history.csv");
        std::fs::write(&path, "displacement,energy\n# frame 0\n0.0,1.5\n0.5, 2.5\n\n1.0,3.0\n")
            .unwrap();

        let curve = load_curve(&path).unwrap();
        assert_eq!(curve.displacement, vec![0.0, 0.5, 1.0]);
        assert_eq!(curve.energy, vec![1.5, 2.5, 3.0]);
    }

    #[test]
    fn only_one_header_line_is_skipped() {
        let dir = scratch_dir("curve-headers");
        let path = dir.join("history.csv");
        std::fs::write(&path, "displacement,energy\nmm,mJ\n0.0,1.5\n1.0,3.0\n").unwrap();

        assert!(matches!(load_curve(&path), Err(WaterbombError::Parse(_))));
    }

    #[test]
    fn rejects_garbage_after_samples() {
        let dir = scratch_dir("curve-bad");
        let path = dir.join("history.txt");
        std::fs::write(&path, "0.0\t1.0\n1.0\tabc\n").unwrap();

        assert!(matches!(load_curve(&path), Err(WaterbombError::Parse(_))));
    }

    #[test]
    fn post_process_appends_record() {
        let dir = scratch_dir("post");
        let curve_path = dir.join("history.csv");
        let report_path = dir.join("Report.txt");
        let rows: Vec<String> = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 3.0, 2.0, 4.0, 6.0]
            .iter()
            .enumerate()
            .map(|(i, e)| format!("{}.0,{:?}", i, e))
            .collect();
        std::fs::write(&curve_path, rows.join("\n")).unwrap();

        let x = ParameterVector::new(1.0, 0.1, 0.5, 0.9);
        let delta = post_process(&curve_path, &x, &report_path).unwrap();

        assert_relative_eq!(delta, 1.0 / 3.0);
        let report = std::fs::read_to_string(&report_path).unwrap();
        assert!(report.starts_with("1.0\t0.1\t0.5\t0.9\t0.333"));
        assert!(report.ends_with('\n'));
    }
}
