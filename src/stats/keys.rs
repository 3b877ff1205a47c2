//! Key namespacing for job metrics
//!
//! A key template names where a job's metrics live. `{job}` is replaced by
//! the job name. When the template also carries `{metric}`, each metric gets
//! its own flat key:
//!
//! - `crawl1:stats:pages_crawled`   (template `{job}:stats:{metric}`)
//!
//! Without `{metric}` the template names one hash per job and the metric name
//! is the hash field:
//!
//! - `crawl1:stats` field `pages_crawled`   (template `{job}:stats`)
//!
//! Extremes are the exception in the hash layout. Each max/min metric lives
//! in its own key next to the hash, `crawl1:stats:max_depth` for the template
//! above, so its compare-and-set only watches that one key and counter
//! traffic on the hash never aborts it.
//!
//! Job names are restricted to [`JobId::is_job_char`], and the template text
//! right after `{job}` must start outside that set. This keeps every job's
//! keys disjoint from every other job's glob pattern.

use std::fmt;

use crate::error::ConfigError;

pub const JOB_PLACEHOLDER: &str = "{job}";
pub const METRIC_PLACEHOLDER: &str = "{metric}";
pub const DEFAULT_KEY_TEMPLATE: &str = "{job}:stats:{metric}";
pub const DEFAULT_JOB: &str = "<default>";
/// Joins the job hash name and the metric name of an extremum key.
pub const EXTREMUM_SEPARATOR: &str = ":";

/// Validated job name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConfigError::InvalidJob {
                name,
                reason: "empty".to_string(),
            });
        }
        if let Some(c) = name.chars().find(|c| !Self::is_job_char(*c)) {
            return Err(ConfigError::InvalidJob {
                reason: format!("character {:?} not allowed", c),
                name,
            });
        }
        Ok(JobId(name))
    }

    /// The sentinel job used when nothing is bound.
    pub fn default_job() -> Self {
        JobId(DEFAULT_JOB.to_string())
    }

    pub fn is_job_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '<' | '>' | '@' | '+')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobId::new(s)
    }
}

/// Storage location of one metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Key(String),
    Field { container: String, field: String },
}

impl Slot {
    /// Key that WATCH must guard for this slot.
    pub fn watch_key(&self) -> &str {
        match self {
            Slot::Key(key) => key,
            Slot::Field { container, .. } => container,
        }
    }
}

/// How a job's metrics are laid out in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// One key per metric: `prefix + job + middle + metric + suffix`.
    Flat {
        prefix: String,
        middle: String,
        suffix: String,
    },
    /// One hash per job: `prefix + job + suffix`, metric as field.
    Hash { prefix: String, suffix: String },
}

/// Resolves (job, metric) pairs to storage slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyNamespace {
    layout: Layout,
}

impl Default for KeyNamespace {
    fn default() -> Self {
        KeyNamespace::new(DEFAULT_KEY_TEMPLATE).expect("default template is valid")
    }
}

impl KeyNamespace {
    pub fn new(template: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        if template.matches(JOB_PLACEHOLDER).count() != 1 {
            return Err(invalid("must contain {job} exactly once"));
        }
        let metric_count = template.matches(METRIC_PLACEHOLDER).count();
        if metric_count > 1 {
            return Err(invalid("may contain {metric} at most once"));
        }

        let (prefix, rest) = template
            .split_once(JOB_PLACEHOLDER)
            .ok_or_else(|| invalid("must contain {job} exactly once"))?;

        let layout = if metric_count == 1 {
            let (middle, suffix) = rest
                .split_once(METRIC_PLACEHOLDER)
                .ok_or_else(|| invalid("{metric} must follow {job}"))?;
            if middle.is_empty() {
                return Err(invalid("{job} and {metric} need a separator between them"));
            }
            Layout::Flat {
                prefix: prefix.to_string(),
                middle: middle.to_string(),
                suffix: suffix.to_string(),
            }
        } else {
            Layout::Hash {
                prefix: prefix.to_string(),
                suffix: rest.to_string(),
            }
        };

        let after_job = match &layout {
            Layout::Flat { middle, .. } => middle.as_str(),
            Layout::Hash { suffix, .. } => suffix.as_str(),
        };
        if after_job.chars().next().is_some_and(JobId::is_job_char) {
            return Err(invalid(
                "text after {job} must start with a separator that cannot occur in job names",
            ));
        }

        Ok(KeyNamespace { layout })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn is_hash(&self) -> bool {
        matches!(self.layout, Layout::Hash { .. })
    }

    /// Slot for one metric of one job.
    pub fn resolve(&self, job: &JobId, metric: &str) -> Slot {
        match &self.layout {
            Layout::Flat {
                prefix,
                middle,
                suffix,
            } => Slot::Key(format!("{}{}{}{}{}", prefix, job, middle, metric, suffix)),
            Layout::Hash { prefix, suffix } => Slot::Field {
                container: format!("{}{}{}", prefix, job, suffix),
                field: metric.to_string(),
            },
        }
    }

    /// Slot a max/min metric is tracked in.
    ///
    /// Same as [`resolve`](Self::resolve) in the flat layout. In the hash
    /// layout it is a key of its own, never a field of the job hash.
    pub fn extremum_slot(&self, job: &JobId, metric: &str) -> Slot {
        match &self.layout {
            Layout::Flat { .. } => self.resolve(job, metric),
            Layout::Hash { prefix, suffix } => Slot::Key(format!(
                "{}{}{}{}{}",
                prefix, job, suffix, EXTREMUM_SEPARATOR, metric
            )),
        }
    }

    /// Hash key holding the job's fields (hash layout only).
    pub fn container(&self, job: &JobId) -> Option<String> {
        match &self.layout {
            Layout::Hash { prefix, suffix } => Some(format!("{}{}{}", prefix, job, suffix)),
            Layout::Flat { .. } => None,
        }
    }

    /// Glob matching every per-metric key of the job: all metric keys in
    /// the flat layout, the extremum keys in the hash layout.
    pub fn pattern(&self, job: &JobId) -> String {
        match &self.layout {
            Layout::Flat {
                prefix,
                middle,
                suffix,
            } => format!(
                "{}{}{}*{}",
                escape_glob(prefix),
                escape_glob(job.as_str()),
                escape_glob(middle),
                escape_glob(suffix)
            ),
            Layout::Hash { prefix, suffix } => format!(
                "{}{}{}{}*",
                escape_glob(prefix),
                escape_glob(job.as_str()),
                escape_glob(suffix),
                escape_glob(EXTREMUM_SEPARATOR)
            ),
        }
    }

    /// Recover the metric name from a key matched by [`pattern`](Self::pattern).
    pub fn metric_name<'k>(&self, job: &JobId, key: &'k str) -> Option<&'k str> {
        match &self.layout {
            Layout::Flat {
                prefix,
                middle,
                suffix,
            } => key
                .strip_prefix(prefix.as_str())?
                .strip_prefix(job.as_str())?
                .strip_prefix(middle.as_str())?
                .strip_suffix(suffix.as_str()),
            Layout::Hash { prefix, suffix } => key
                .strip_prefix(prefix.as_str())?
                .strip_prefix(job.as_str())?
                .strip_prefix(suffix.as_str())?
                .strip_prefix(EXTREMUM_SEPARATOR),
        }
    }
}

/// Escape glob metacharacters so text matches itself literally.
pub fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
