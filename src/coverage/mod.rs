// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stagehand contributors

//! Coverage extraction
//!
//! A narrow text-matching layer: applies a job's configured pattern to its
//! captured output and parses the result as a percentage. Coverage is
//! informational only and never gates job or pipeline status. This module
//! deliberately knows nothing about processes or report files.

use regex::Regex;

/// Extract a coverage percentage from captured output
///
/// The first capture group of the first match is parsed as a number; a
/// trailing `%` is tolerated. Patterns without a capture group use the whole
/// match. No match (or an unparsable capture) yields `None`, never an error.
pub fn extract(output: &str, pattern: &Regex) -> Option<f64> {
    for captures in pattern.captures_iter(output) {
        let matched = captures.get(1).or_else(|| captures.get(0));

        if let Some(matched) = matched {
            let text = matched.as_str().trim().trim_end_matches('%');
            if let Ok(value) = text.parse::<f64>() {
                return Some(value);
            }
        }
    }

    None
}

/// Fold per-job coverage values into a pipeline-level value
///
/// The arithmetic mean of jobs that produced a value; `None` when none did.
pub fn aggregate<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let mut sum = 0.0;
    let mut count = 0usize;

    for value in values {
        sum += value;
        count += 1;
    }

    (count > 0).then(|| sum / count as f64)
}
