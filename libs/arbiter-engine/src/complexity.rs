//! Complexity estimation from per-case timing and memory growth.
//!
//! This is a coarse heuristic: it compares the slowest case against the
//! fastest one and buckets the ratio. Container start-up noise alone can
//! move a small submission across a boundary, so the labels are approximate.

use arbiter_common::types::{ComplexityClass, FailureKind, TestResult};

const CONSTANT_RATIO: f64 = 1.5;
const LINEARITHMIC_RATIO: f64 = 10.0;
const QUADRATIC_RATIO: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Size of the test input in bytes, used for ordering
    pub input_len: usize,
    pub time_ms: u64,
    /// 0.0 when memory could not be measured
    pub memory_mb: f64,
}

/// Samples for every case that actually ran, ordered by ascending input size
pub fn samples_from(results: &[TestResult]) -> Vec<Sample> {
    let mut samples: Vec<Sample> = results
        .iter()
        .filter(|r| r.failure != Some(FailureKind::CompileFailure))
        .map(|r| Sample {
            input_len: r.input.len(),
            time_ms: r.execution_time_ms,
            memory_mb: r.memory_used_mb,
        })
        .collect();
    samples.sort_by_key(|s| s.input_len);
    samples
}

/// Returns `(time, space)` labels
pub fn estimate(samples: &[Sample]) -> (ComplexityClass, ComplexityClass) {
    if samples.len() < 2 {
        return (ComplexityClass::Linear, ComplexityClass::Constant);
    }
    (time_class(samples), space_class(samples))
}

fn time_class(samples: &[Sample]) -> ComplexityClass {
    let min = samples.iter().map(|s| s.time_ms).min().unwrap_or(0);
    let max = samples.iter().map(|s| s.time_ms).max().unwrap_or(0);
    let ratio = max as f64 / min.max(1) as f64;

    if ratio < CONSTANT_RATIO {
        ComplexityClass::Constant
    } else if ratio >= QUADRATIC_RATIO {
        ComplexityClass::Quadratic
    } else if ratio >= LINEARITHMIC_RATIO {
        ComplexityClass::Linearithmic
    } else {
        ComplexityClass::Linear
    }
}

fn space_class(samples: &[Sample]) -> ComplexityClass {
    if samples.iter().any(|s| s.memory_mb <= 0.0) {
        return ComplexityClass::Constant;
    }

    let min = samples.iter().map(|s| s.memory_mb).fold(f64::INFINITY, f64::min);
    let max = samples.iter().map(|s| s.memory_mb).fold(0.0, f64::max);

    if max / min < CONSTANT_RATIO {
        ComplexityClass::Constant
    } else {
        ComplexityClass::Linear
    }
}
