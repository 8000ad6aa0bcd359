//! Run metrics aggregation

use chrono::NaiveDate;

use crate::model::{ExceptionRecord, MetricsPayload};

/// Summarize an exception set.
///
/// There is no explain/suppression workflow: every exception is unexplained,
/// so `unexplained_exceptions == total_exceptions`.
pub fn compute(exceptions: &[ExceptionRecord], run_id: &str, as_of_date: NaiveDate) -> MetricsPayload {
    let total = exceptions.len() as u64;
    MetricsPayload {
        run_id: run_id.to_string(),
        as_of_date,
        total_exceptions: total,
        unexplained_exceptions: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DifferenceType, Value};

    fn exception(i: usize) -> ExceptionRecord {
        ExceptionRecord {
            run_id: "r".into(),
            as_of_date: NaiveDate::from_ymd_opt(2023, 12, 29).unwrap(),
            instrument_id: format!("US{i:04}"),
            attribute: "coupon".into(),
            source_system: "legacy".into(),
            target_system: "strategic".into(),
            source_value: Some(Value::Float(1.0)),
            target_value: None,
            difference_type: DifferenceType::OnlyInSource,
        }
    }

    #[test]
    fn test_empty_exception_set() {
        let date = NaiveDate::from_ymd_opt(2023, 12, 29).unwrap();
        let m = compute(&[], "run-0", date);
        assert_eq!(m.total_exceptions, 0);
        assert_eq!(m.unexplained_exceptions, 0);
        assert_eq!(m.run_id, "run-0");
        assert_eq!(m.as_of_date, date);
    }

    #[test]
    fn test_unexplained_always_equals_total() {
        let date = NaiveDate::from_ymd_opt(2023, 12, 29).unwrap();
        for n in [1usize, 2, 7, 250] {
            let exceptions: Vec<_> = (0..n).map(exception).collect();
            let m = compute(&exceptions, "run-n", date);
            assert_eq!(m.total_exceptions, n as u64);
            assert_eq!(m.unexplained_exceptions, n as u64);
        }
    }
}
