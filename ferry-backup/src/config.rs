//! Processed job configuration.
//!
//! [`build`] turns the raw YAML model into validated [`JobConfig`]s: ids are
//! checked, clusters resolved, regexes and schedules compiled and keep rules
//! constructed. Every failure names the offending job.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use cron::Schedule;
use ferry_core::config::load_at;
use ferry_core::{
    BoxError, ClusterConfig, ConfigDefaults, ConfigError, JobId, RawConfig, RawJobConfig,
};
use ferry_prune::RetentionPolicy;
use regex::Regex;

/// One validated replication job.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub id: JobId,
    pub label: String,
    pub cluster: ClusterConfig,
    pub source_pool: String,
    /// Base path under which destination volumes are created.
    pub destination: String,
    pub include: Option<Regex>,
    pub exclude: Option<Regex>,
    pub max_concurrency: usize,
    pub snapshot_prefix: String,
    pub schedule: Option<Schedule>,
    pub retention: RetentionPolicy,
}

impl JobConfig {
    /// A minimal job with defaults, for programmatic construction.
    pub fn new(
        id: impl Into<String>,
        source_pool: impl Into<String>,
        destination: impl Into<String>,
        defaults: &ConfigDefaults,
    ) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id: JobId(id),
            cluster: defaults.cluster.clone(),
            source_pool: source_pool.into(),
            destination: destination.into(),
            include: None,
            exclude: None,
            max_concurrency: defaults.max_concurrency,
            snapshot_prefix: defaults.snapshot_prefix.clone(),
            schedule: None,
            retention: RetentionPolicy::noop(),
        }
    }

    /// Exclude wins; otherwise the name must match `include` when present.
    pub fn selects(&self, volume: &str) -> bool {
        if self.exclude.as_ref().is_some_and(|re| re.is_match(volume)) {
            return false;
        }
        self.include.as_ref().map_or(true, |re| re.is_match(volume))
    }
}

/// Every job from one configuration file, in file order.
#[derive(Debug, Clone, Default)]
pub struct BackupConfig {
    pub jobs: Vec<Arc<JobConfig>>,
}

impl BackupConfig {
    pub fn job(&self, id: &str) -> Option<&Arc<JobConfig>> {
        self.jobs.iter().find(|j| j.id.0 == id)
    }
}

/// Load and build `path` in one step.
pub fn load(path: &Path, defaults: &ConfigDefaults) -> Result<BackupConfig, ConfigError> {
    let raw = load_at(path)?;
    build(&raw, defaults)
}

/// Validate `raw` and apply `defaults`.
pub fn build(raw: &RawConfig, defaults: &ConfigDefaults) -> Result<BackupConfig, ConfigError> {
    let mut seen = BTreeSet::new();
    let mut jobs = Vec::with_capacity(raw.jobs.len());
    for (index, job) in raw.jobs.iter().enumerate() {
        let built = build_job(index, job, raw, defaults)?;
        if !seen.insert(built.id.0.clone()) {
            return Err(ConfigError::DuplicateJob(built.id.0));
        }
        jobs.push(Arc::new(built));
    }
    Ok(BackupConfig { jobs })
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn build_job(
    index: usize,
    job: &RawJobConfig,
    raw: &RawConfig,
    defaults: &ConfigDefaults,
) -> Result<JobConfig, ConfigError> {
    let id = job.id.trim();
    if id.is_empty() {
        return Err(ConfigError::MissingJobId { index });
    }
    if !valid_id(id) {
        return Err(ConfigError::InvalidJobId(id.to_string()));
    }

    let cluster = if job.cluster.is_empty() {
        defaults.cluster.clone()
    } else {
        raw.clusters
            .get(&job.cluster)
            .map(|c| c.resolve(defaults))
            .ok_or_else(|| ConfigError::UnknownCluster {
                job: id.to_string(),
                cluster: job.cluster.clone(),
            })?
    };

    let required = |value: &str, field: &'static str| {
        if value.trim().is_empty() {
            Err(ConfigError::MissingField {
                job: id.to_string(),
                field,
            })
        } else {
            Ok(value.trim().to_string())
        }
    };
    let source_pool = required(&job.source_pool, "sourcePool")?;
    let destination = required(&job.destination, "destination")?
        .trim_end_matches('/')
        .to_string();

    let max_concurrency = match job.max_concurrency {
        None => defaults.max_concurrency,
        Some(value) if value < 1 => {
            return Err(ConfigError::InvalidConcurrency {
                job: id.to_string(),
                value,
            })
        }
        Some(value) => usize::try_from(value).unwrap_or(usize::MAX),
    };

    let include = compile(job.include.as_deref()).map_err(|e| invalid(id, "include", e))?;
    let exclude = compile(job.exclude.as_deref()).map_err(|e| invalid(id, "exclude", e))?;
    let schedule = match job.schedule.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(text) => Some(parse_schedule(text).map_err(|e| invalid(id, "schedule", e))?),
    };
    let retention = RetentionPolicy::from_config(job.pruning.as_ref())
        .map_err(|e| invalid(id, "pruning", e))?;

    let snapshot_prefix = job
        .snapshot_prefix
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map_or_else(|| defaults.snapshot_prefix.clone(), str::to_string);

    Ok(JobConfig {
        id: JobId(id.to_string()),
        label: job
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(id)
            .to_string(),
        cluster,
        source_pool,
        destination,
        include,
        exclude,
        max_concurrency,
        snapshot_prefix,
        schedule,
        retention,
    })
}

fn invalid(job: &str, field: &'static str, source: impl Into<BoxError>) -> ConfigError {
    ConfigError::InvalidField {
        job: job.to_string(),
        field,
        source: source.into(),
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>, regex::Error> {
    match pattern {
        None | Some("") => Ok(None),
        Some(p) => Regex::new(p).map(Some),
    }
}

/// Parse a cron expression.
///
/// Five fields are standard crontab syntax (minute resolution, Sunday is `0`
/// or `7` in the day-of-week field); they get a leading seconds field of `0`
/// and their day-of-week field is renumbered to the `cron` crate's 1-7
/// (Sunday = 1). Six or seven fields are taken as-is in the crate's syntax.
pub fn parse_schedule(text: &str) -> Result<Schedule, BoxError> {
    let text = text.trim();
    let fields: Vec<&str> = text.split_whitespace().collect();
    let expr = match fields.as_slice() {
        [minute, hour, dom, month, dow] => {
            format!("0 {minute} {hour} {dom} {month} {}", crontab_weekdays(dow)?)
        }
        _ => text.to_string(),
    };
    Ok(Schedule::from_str(&expr)?)
}

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Rewrite a crontab day-of-week field (0-7, Sunday = 0 or 7) as an explicit
/// list of `cron` crate weekdays (1-7, Sunday = 1).
fn crontab_weekdays(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }
    let mut days = [false; 7];
    for term in field.split(',') {
        let bad = || format!("invalid day-of-week term '{term}' in '{field}'");
        let (range, step) = match term.split_once('/') {
            Some((range, step)) => (range, step.parse::<usize>().map_err(|_| bad())?),
            None => (term, 1),
        };
        if step == 0 {
            return Err(bad());
        }
        let (first, last) = match range {
            "*" => (0, 6),
            _ => match range.split_once('-') {
                Some((lo, hi)) => (weekday(lo).ok_or_else(bad)?, weekday(hi).ok_or_else(bad)?),
                None => {
                    let day = weekday(range).ok_or_else(bad)?;
                    let last = if step > 1 { 7 } else { day };
                    (day, last)
                }
            },
        };
        if first > last {
            return Err(bad());
        }
        for day in (first..=last).step_by(step) {
            days[day % 7] = true;
        }
    }
    let list: Vec<String> = (0..7)
        .filter(|&d| days[d])
        .map(|d| (d + 1).to_string())
        .collect();
    Ok(list.join(","))
}

/// A crontab weekday number (0-7) or three-letter name.
fn weekday(token: &str) -> Option<usize> {
    if let Ok(n) = token.parse::<usize>() {
        return (n <= 7).then_some(n);
    }
    WEEKDAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
