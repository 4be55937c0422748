//! Retention grids.
//!
//! A grid is an ordered list of intervals, newest first. Written as
//! `N x DURATION (keep=K)` terms separated by `|`, e.g.
//! `1x1h(keep=all) | 24x1h | 14x1d`. Each term expands to `N` intervals of
//! `DURATION`; `keep` defaults to 1. Units: `s m h d w`.

use chrono::{DateTime, Duration, Utc};

use crate::error::RuleError;

/// How many snapshots an interval retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepCount {
    All,
    Count(usize),
}

/// One bucket of a retention grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridInterval {
    pub length: Duration,
    pub keep: KeepCount,
}

impl GridInterval {
    pub fn new(length: Duration, keep: KeepCount) -> Self {
        Self { length, keep }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a grid spec string into its expanded interval list.
pub fn parse_grid_spec(spec: &str) -> Result<Vec<GridInterval>, RuleError> {
    let terms: Vec<&str> = spec.split('|').collect();
    let total = terms.len();
    let mut intervals = Vec::new();
    for (i, term) in terms.iter().enumerate() {
        let parsed = parse_term(term).map_err(|reason| RuleError::GridSpec {
            term: i + 1,
            total,
            text: term.trim().to_string(),
            reason,
        })?;
        intervals.extend(parsed);
    }
    Ok(intervals)
}

fn parse_term(term: &str) -> Result<Vec<GridInterval>, String> {
    let term = term.trim();
    let (head, params) = match term.split_once('(') {
        Some((head, rest)) => {
            let inner = rest
                .trim_end()
                .strip_suffix(')')
                .ok_or_else(|| "unterminated interval parameters".to_string())?;
            (head, Some(inner))
        }
        None => (term, None),
    };

    let (times, duration) = head
        .split_once('x')
        .ok_or_else(|| "retention string does not match expected format".to_string())?;
    let times: usize = times
        .trim()
        .parse()
        .map_err(|_| format!("invalid factor '{}'", times.trim()))?;
    if times == 0 {
        return Err("contains factor <= 0".to_string());
    }
    let length = parse_duration(duration)?;

    let keep = match params {
        None => KeepCount::Count(1),
        Some(p) => parse_keep(p)?,
    };

    Ok(vec![GridInterval::new(length, keep); times])
}

fn parse_keep(params: &str) -> Result<KeepCount, String> {
    let value = params
        .trim()
        .strip_prefix("keep=")
        .ok_or_else(|| "interval parameter contains unknown parameters".to_string())?
        .trim();
    if value == "all" {
        return Ok(KeepCount::All);
    }
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(KeepCount::Count(n)),
        _ => Err(format!("cannot parse keep count '{value}'")),
    }
}

/// Parse a positive duration such as `10s`, `1h` or `14 d`.
pub(crate) fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{text}' has no unit"))?;
    let (digits, unit) = text.split_at(split);
    let value: i64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{text}'"))?;
    if value <= 0 {
        return Err(format!("duration '{text}' must be positive"));
    }
    let unit_secs: i64 = match unit.trim() {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        "w" => 7 * 24 * 60 * 60,
        other => return Err(format!("unknown duration unit '{other}'")),
    };
    value
        .checked_mul(unit_secs)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| format!("duration '{text}' is too large"))
}

// ---------------------------------------------------------------------------
// Validation and fitting
// ---------------------------------------------------------------------------

/// Reject grids whose interval lengths shrink, unless every interval before
/// the shorter one keeps all of its snapshots.
pub(crate) fn check_monotonic(intervals: &[GridInterval]) -> Result<(), RuleError> {
    if intervals.is_empty() {
        return Err(RuleError::EmptyGrid);
    }
    let mut last = Duration::zero();
    for (i, interval) in intervals.iter().enumerate() {
        if interval.length < last
            && !intervals[..i].iter().all(|p| p.keep == KeepCount::All)
        {
            return Err(RuleError::NonMonotonicGrid { index: i });
        }
        last = interval.length;
    }
    Ok(())
}

/// Fit `(index, timestamp)` entries into the grid and return the indices
/// that do not fit.
///
/// The newest entry defines "now". An entry whose age is at most the
/// cumulative length of intervals `0..=i` (and more than that of `0..i`)
/// lands in bucket `i`; entries older than the whole grid are destroyed.
/// Within a bucket, entries with equal timestamps keep their input order.
pub(crate) fn fit_entries(
    intervals: &[GridInterval],
    entries: &[(usize, DateTime<Utc>)],
) -> Vec<usize> {
    let Some(now) = entries.iter().map(|(_, t)| *t).max() else {
        return Vec::new();
    };

    let mut buckets: Vec<Vec<(usize, DateTime<Utc>)>> = vec![Vec::new(); intervals.len()];
    let mut destroy = Vec::new();

    for &(idx, ts) in entries {
        let age = now - ts;
        let mut upper = Duration::zero();
        let slot = intervals.iter().position(|interval| {
            upper = upper.checked_add(&interval.length).unwrap_or(upper);
            age <= upper
        });
        match slot {
            Some(bucket) => buckets[bucket].push((idx, ts)),
            None => destroy.push(idx),
        }
    }

    for (interval, mut bucket) in intervals.iter().zip(buckets) {
        bucket.sort_by(|a, b| b.1.cmp(&a.1));
        let keep = match interval.keep {
            KeepCount::All => bucket.len(),
            KeepCount::Count(n) => n.min(bucket.len()),
        };
        destroy.extend(bucket[keep..].iter().map(|(idx, _)| *idx));
    }

    destroy
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn secs(n: i64) -> Duration {
        Duration::seconds(n)
    }

    #[test]
    fn expands_factor_and_keep() {
        let grid = parse_grid_spec("1x1h(keep=all) | 2x1d | 1x2w (keep=3)").expect("parse");
        assert_eq!(
            grid,
            vec![
                GridInterval::new(secs(3600), KeepCount::All),
                GridInterval::new(secs(86_400), KeepCount::Count(1)),
                GridInterval::new(secs(86_400), KeepCount::Count(1)),
                GridInterval::new(secs(14 * 86_400), KeepCount::Count(3)),
            ]
        );
    }

    #[test]
    fn rejects_malformed_terms() {
        for bad in ["", "10s", "0x10s", "1x0s", "1x10q", "1x10s(keep=0)", "1x10s(foo=1)", "1x10s(keep=all"] {
            let err = parse_grid_spec(bad).unwrap_err();
            assert!(matches!(err, RuleError::GridSpec { .. }), "{bad}: {err}");
        }
    }

    #[test]
    fn error_names_the_failing_term() {
        let err = parse_grid_spec("1x10s | bogus").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("interval 2 of 2"), "{msg}");
        assert!(msg.contains("bogus"), "{msg}");
    }

    #[test]
    fn duration_units() {
        assert_eq!(parse_duration("90s"), Ok(secs(90)));
        assert_eq!(parse_duration(" 5 m "), Ok(secs(300)));
        assert_eq!(parse_duration("1w"), Ok(secs(604_800)));
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn monotonic_check() {
        let decreasing = [
            GridInterval::new(secs(10), KeepCount::Count(1)),
            GridInterval::new(secs(5), KeepCount::Count(1)),
        ];
        assert!(matches!(
            check_monotonic(&decreasing),
            Err(RuleError::NonMonotonicGrid { index: 1 })
        ));

        let after_keep_all = [
            GridInterval::new(secs(3600), KeepCount::All),
            GridInterval::new(secs(60), KeepCount::Count(1)),
            GridInterval::new(secs(3600), KeepCount::Count(1)),
        ];
        assert!(check_monotonic(&after_keep_all).is_ok());
        assert!(matches!(check_monotonic(&[]), Err(RuleError::EmptyGrid)));
    }

    #[test]
    fn fit_keeps_newest_per_bucket_and_drops_stragglers() {
        let t = |s: i64| Utc.timestamp_opt(s, 0).single().expect("ts");
        let grid = [
            GridInterval::new(secs(10), KeepCount::Count(1)),
            GridInterval::new(secs(10), KeepCount::Count(1)),
        ];
        // now = 30; bucket 0 covers ages 0..=10, bucket 1 ages 11..=20
        let entries = [(0, t(4)), (1, t(14)), (2, t(22)), (3, t(25)), (4, t(30))];
        let mut destroyed = fit_entries(&grid, &entries);
        destroyed.sort_unstable();
        assert_eq!(destroyed, vec![0, 2, 3]);
    }

    #[test]
    fn keep_all_bucket_retains_everything_inside() {
        let t = |s: i64| Utc.timestamp_opt(s, 0).single().expect("ts");
        let grid = [GridInterval::new(secs(60), KeepCount::All)];
        let entries = [(0, t(0)), (1, t(30)), (2, t(59)), (3, t(60))];
        assert!(fit_entries(&grid, &entries).is_empty());
    }
}
