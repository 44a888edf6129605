use std::fmt::Display;

use crate::error::WaterbombError;

/// Number of design parameters
pub const DIM: usize = 4;

/// Default lower bounds on `[rel_depth, t1, t2, t3]`
pub const LOWER_BOUNDS: [f64; DIM] = [0.0, 0.01, 0.01, 0.01];

/// Default upper bounds on `[rel_depth, t1, t2, t3]`
pub const UPPER_BOUNDS: [f64; DIM] = [2.0, 0.99, 0.99, 0.99];

/// Formats a float the way the report and launch script expect it: shortest
/// round-trip digits, always with a fractional part (`1.0`, `-inf`), and a
/// signed exponent of at least two digits (`1e-05`, `1e+16`).
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }

    let repr = format!("{:?}", value);
    match repr.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => repr,
    }
}

/// One candidate design: relative fold depth and the three panel thicknesses
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterVector {
    pub rel_depth: f64,
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
}

impl ParameterVector {
    pub fn new(rel_depth: f64, t1: f64, t2: f64, t3: f64) -> ParameterVector {
        ParameterVector {
            rel_depth,
            t1,
            t2,
            t3,
        }
    }

    /// Builds a parameter vector from optimizer coordinates
    ///
    /// # Arguments
    /// * `coords` - Exactly four finite coordinates
    pub fn from_slice(coords: &[f64]) -> Result<ParameterVector, WaterbombError> {
        if coords.len() != DIM {
            return Err(WaterbombError::Input(format!(
                "Expected {DIM} design parameters, got {}",
                coords.len()
            )));
        }
        if let Some(bad) = coords.iter().find(|c| !c.is_finite()) {
            return Err(WaterbombError::Input(format!(
                "Design parameter {bad} is not finite"
            )));
        }

        Ok(ParameterVector::new(coords[0], coords[1], coords[2], coords[3]))
    }

    pub fn to_array(&self) -> [f64; DIM] {
        [self.rel_depth, self.t1, self.t2, self.t3]
    }

    /// Checks every coordinate against inclusive bounds
    pub fn within_bounds(&self, lower: &[f64; DIM], upper: &[f64; DIM]) -> bool {
        self.to_array()
            .iter()
            .zip(lower.iter().zip(upper.iter()))
            .all(|(x, (lo, hi))| lo <= x && x <= hi)
    }
}

impl Display for ParameterVector {
    /// Bracketed list, e.g. `[1.0, 0.1, 0.5, 0.9]`
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let coords: Vec<String> = self.to_array().iter().map(|c| float_repr(*c)).collect();
        write!(f, "[{}]", coords.join(", "))
    }
}

/// Strain energy history of one completed solve
#[derive(Debug, Clone)]
pub struct HistoryCurve {
    pub displacement: Vec<f64>,
    pub energy: Vec<f64>,
}

impl HistoryCurve {
    pub fn new(displacement: Vec<f64>, energy: Vec<f64>) -> Result<HistoryCurve, WaterbombError> {
        if displacement.len() != energy.len() {
            return Err(WaterbombError::Input(format!(
                "History curve has {} displacement samples but {} energy samples",
                displacement.len(),
                energy.len()
            )));
        }

        Ok(HistoryCurve {
            displacement,
            energy,
        })
    }

    pub fn len(&self) -> usize {
        self.energy.len()
    }
}

/// Objective value handed to the optimizer. Lower is better; never NaN.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct FitnessValue(f64);

impl FitnessValue {
    /// Score of an unusable evaluation
    pub const PENALTY: FitnessValue = FitnessValue(f64::INFINITY);

    pub fn new(value: f64) -> Option<FitnessValue> {
        if value.is_nan() {
            None
        } else {
            Some(FitnessValue(value))
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Display for FitnessValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", float_repr(self.0))
    }
}

/// One line of the report file
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportRecord {
    pub params: ParameterVector,
    pub delta: f64,
}

impl Display for ReportRecord {
    /// `rel_depth<TAB>t1<TAB>t2<TAB>t3<TAB>delta`, without the newline
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fields: Vec<String> = self
            .params
            .to_array()
            .iter()
            .chain(std::iter::once(&self.delta))
            .map(|v| float_repr(*v))
            .collect();
        write!(f, "{}", fields.join("\t"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_render_as_list() {
        let x = ParameterVector::new(1.0, 0.1, 0.5, 0.9);
        assert_eq!(x.to_string(), "[1.0, 0.1, 0.5, 0.9]");
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        assert!(ParameterVector::from_slice(&[1.0, 0.1, 0.5]).is_err());
        assert!(ParameterVector::from_slice(&[1.0, 0.1, f64::NAN, 0.5]).is_err());
    }

    #[test]
    fn bounds_are_inclusive() {
        let lower = ParameterVector::new(0.0, 0.01, 0.01, 0.01);
        let outside = ParameterVector::new(2.5, 0.5, 0.5, 0.5);
        assert!(lower.within_bounds(&LOWER_BOUNDS, &UPPER_BOUNDS));
        assert!(!outside.within_bounds(&LOWER_BOUNDS, &UPPER_BOUNDS));
    }

    #[test]
    fn record_is_tab_separated() {
        let record = ReportRecord {
            params: ParameterVector::new(1.0, 0.1, 0.5, 0.9),
            delta: f64::NEG_INFINITY,
        };
        assert_eq!(record.to_string(), "1.0\t0.1\t0.5\t0.9\t-inf");
    }

    #[test]
    fn exponents_are_signed_and_padded() {
        assert_eq!(float_repr(1e-5), "1e-05");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(-2.5e-300), "-2.5e-300");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(f64::NAN), "nan");
    }

    #[test]
    fn fitness_rejects_nan() {
        assert!(FitnessValue::new(f64::NAN).is_none());
        assert_eq!(FitnessValue::new(-3.5).unwrap().value(), -3.5);
        assert!(FitnessValue::PENALTY.value().is_infinite());
    }

    #[test]
    fn mismatched_curve_is_rejected() {
        assert!(HistoryCurve::new(vec![0.0, 1.0], vec![1.0]).is_err());
    }
}
