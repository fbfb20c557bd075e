use std::collections::VecDeque;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::{PollError, Result};

/// Connection limits to try, one per daemon tick.
///
/// Built from `(start, stop, step, repetitions)`: the half-open range is
/// shuffled once, then each value is repeated `repetitions` times in a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepPlan {
    values: VecDeque<usize>,
}

impl SweepPlan {
    pub fn from_args(args: &[i64]) -> Result<Self> {
        Self::from_args_with_rng(args, &mut rand::rng())
    }

    pub fn from_args_with_rng<R: Rng + ?Sized>(args: &[i64], rng: &mut R) -> Result<Self> {
        let &[start, stop, step, repetitions] = args else {
            return Err(PollError::Configuration(format!(
                "max_conn_test takes 4 integers (start, stop, step, repetitions), got {}",
                args.len()
            )));
        };

        if step == 0 {
            return Err(PollError::Configuration(
                "max_conn_test step must not be zero".into(),
            ));
        }
        let repetitions = usize::try_from(repetitions)
            .ok()
            .filter(|r| *r > 0)
            .ok_or_else(|| {
                PollError::Configuration("max_conn_test repetitions must be at least 1".into())
            })?;

        let mut distinct = Vec::new();
        for value in half_open_range(start, stop, step) {
            let limit = usize::try_from(value).ok().filter(|v| *v > 0).ok_or_else(|| {
                PollError::Configuration(format!(
                    "max_conn_test produced invalid connection limit {value}"
                ))
            })?;
            distinct.push(limit);
        }
        if distinct.is_empty() {
            return Err(PollError::Configuration(format!(
                "max_conn_test range({start}, {stop}, {step}) is empty"
            )));
        }

        distinct.shuffle(rng);
        let values = distinct
            .into_iter()
            .flat_map(|v| std::iter::repeat_n(v, repetitions))
            .collect();

        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Iterator for SweepPlan {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        self.values.pop_front()
    }
}

fn half_open_range(start: i64, stop: i64, step: i64) -> Vec<i64> {
    let mut values = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        values.push(current);
        match current.checked_add(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    values
}
