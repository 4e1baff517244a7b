use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trailing {
    pub mean: f64,
    /// Observations that went into `mean` (at most the window size).
    pub count: usize,
}

#[derive(Debug, Clone)]
struct Series {
    at: Vec<DateTime<Utc>>,
    values: Vec<f64>,
    /// prefix[i] = sum of values[..i]
    prefix: Vec<f64>,
}

impl Series {
    fn from_sorted(mut obs: Vec<(DateTime<Utc>, f64)>) -> Self {
        obs.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
        let mut prefix = Vec::with_capacity(obs.len() + 1);
        prefix.push(0.0);
        let mut acc = 0.0;
        for (_, v) in &obs {
            acc += v;
            prefix.push(acc);
        }
        Self {
            at: obs.iter().map(|(t, _)| *t).collect(),
            values: obs.into_iter().map(|(_, v)| v).collect(),
            prefix,
        }
    }

    /// Number of observations strictly before `t`.
    fn before(&self, t: DateTime<Utc>) -> usize {
        self.at.partition_point(|at| *at < t)
    }

    fn sum(&self, start: usize, end: usize) -> f64 {
        self.prefix[end] - self.prefix[start]
    }
}

/// Per-key time series answering "what did this key look like strictly before
/// T". Shared by player form factors (keyed by player id) and opponent
/// defensive factors (keyed by normalized team name).
#[derive(Debug, Clone)]
pub struct RollingIndex<K> {
    window: usize,
    series: HashMap<K, Series>,
    pooled: Series,
}

impl<K> RollingIndex<K>
where
    K: Eq + Hash + Clone,
{
    /// Observations with a `None` value never enter the index, so a window of
    /// five means five prior *recorded* values.
    pub fn build<I>(window: usize, observations: I) -> Self
    where
        I: IntoIterator<Item = (K, DateTime<Utc>, Option<f64>)>,
    {
        let mut grouped: HashMap<K, Vec<(DateTime<Utc>, f64)>> = HashMap::new();
        let mut pooled = Vec::new();
        for (key, at, value) in observations {
            let Some(value) = value.filter(|v| v.is_finite()) else {
                continue;
            };
            grouped.entry(key).or_default().push((at, value));
            pooled.push((at, value));
        }
        let series = grouped
            .into_iter()
            .map(|(key, obs)| (key, Series::from_sorted(obs)))
            .collect();
        Self {
            window: window.max(1),
            series,
            pooled: Series::from_sorted(pooled),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Mean of the last `window` observations of `key` strictly before `t`.
    pub fn trailing(&self, key: &K, t: DateTime<Utc>) -> Option<Trailing> {
        let series = self.series.get(key)?;
        let end = series.before(t);
        if end == 0 {
            return None;
        }
        let start = end.saturating_sub(self.window);
        let count = end - start;
        Some(Trailing {
            mean: series.sum(start, end) / count as f64,
            count,
        })
    }

    /// Mean over the whole history of `key` strictly before `t`.
    pub fn expanding(&self, key: &K, t: DateTime<Utc>) -> Option<Trailing> {
        let series = self.series.get(key)?;
        let end = series.before(t);
        if end == 0 {
            return None;
        }
        Some(Trailing {
            mean: series.sum(0, end) / end as f64,
            count: end,
        })
    }

    pub fn count_before(&self, key: &K, t: DateTime<Utc>) -> usize {
        self.series.get(key).map(|s| s.before(t)).unwrap_or(0)
    }

    /// Pooled mean across every key strictly before `t`.
    pub fn league_mean(&self, t: DateTime<Utc>) -> Option<f64> {
        let end = self.pooled.before(t);
        if end == 0 {
            return None;
        }
        Some(self.pooled.sum(0, end) / end as f64)
    }

    /// Most recent value of `key` strictly before `t`.
    pub fn last_before(&self, key: &K, t: DateTime<Utc>) -> Option<f64> {
        let series = self.series.get(key)?;
        let end = series.before(t);
        end.checked_sub(1).map(|i| series.values[i])
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.series.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 1, 15, 0, 0).unwrap() + Duration::days(n)
    }

    #[test]
    fn trailing_excludes_the_current_timestamp() {
        let idx = RollingIndex::build(
            5,
            vec![
                ("a", day(0), Some(1.0)),
                ("a", day(7), Some(3.0)),
                ("a", day(14), Some(100.0)),
            ],
        );
        let t = idx.trailing(&"a", day(14)).unwrap();
        assert_eq!(t.count, 2);
        assert!((t.mean - 2.0).abs() < 1e-12);
        assert!(idx.trailing(&"a", day(0)).is_none());
    }

    #[test]
    fn window_caps_and_missing_values_are_skipped() {
        let obs = (0..8)
            .map(|i| ("p", day(i), if i == 6 { None } else { Some(i as f64) }))
            .collect::<Vec<_>>();
        let idx = RollingIndex::build(3, obs);
        // prior recorded values before day 8: 0,1,2,3,4,5,7 -> last three 4,5,7
        let t = idx.trailing(&"p", day(8)).unwrap();
        assert_eq!(t.count, 3);
        assert!((t.mean - 16.0 / 3.0).abs() < 1e-12);
        assert_eq!(idx.count_before(&"p", day(8)), 7);
        let all = idx.expanding(&"p", day(8)).unwrap();
        assert!((all.mean - 22.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn league_mean_pools_every_key() {
        let idx = RollingIndex::build(
            5,
            vec![
                ("x", day(0), Some(2.0)),
                ("y", day(1), Some(4.0)),
                ("z", day(5), Some(60.0)),
            ],
        );
        assert!((idx.league_mean(day(2)).unwrap() - 3.0).abs() < 1e-12);
        assert!(idx.league_mean(day(0)).is_none());
        assert_eq!(idx.last_before(&"x", day(3)), Some(2.0));
    }
}
