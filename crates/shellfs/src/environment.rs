//! Filesystem environment: the configuration map supplied at open time.
//!
//! Values are a closed variant ([`EnvValue`]) and typed lookups coerce them
//! on every call. Nothing is cached, so a lookup that fails to coerce only
//! fails that call.
//!
//! ```
//! use shellfs::{Environment, TimeUnit};
//!
//! let env = Environment::new()
//!     .with("timeout", "30")
//!     .with("unit", "seconds");
//! assert_eq!(env.get_long("timeout").unwrap(), Some(30));
//! assert_eq!(env.get_time_unit("unit").unwrap(), Some(TimeUnit::Seconds));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use strum::{EnumIter, EnumString};

use crate::error::EnvError;
use crate::session::{Proxy, SessionFactory};

/// Time unit enumeration for timeout-style settings.
///
/// Text values match the uppercase names (`SECONDS`, `MILLISECONDS`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumString, EnumIter)]
#[strum(serialize_all = "UPPERCASE")]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "NANOSECONDS",
            TimeUnit::Microseconds => "MICROSECONDS",
            TimeUnit::Milliseconds => "MILLISECONDS",
            TimeUnit::Seconds => "SECONDS",
            TimeUnit::Minutes => "MINUTES",
            TimeUnit::Hours => "HOURS",
            TimeUnit::Days => "DAYS",
        }
    }

    /// Duration of `amount` of this unit, saturating on overflow.
    pub fn to_duration(&self, amount: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(amount),
            TimeUnit::Microseconds => Duration::from_micros(amount),
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(60 * 60)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(24 * 60 * 60)),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loosely-typed environment value.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvValue {
    /// Present but empty. Distinct from an absent key.
    Null,
    String(String),
    Integer(i64),
    TimeUnit(TimeUnit),
    SessionFactory(Arc<SessionFactory>),
    Proxy(Proxy),
}

impl EnvValue {
    /// Short type name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            EnvValue::Null => "null",
            EnvValue::String(_) => "string",
            EnvValue::Integer(_) => "integer",
            EnvValue::TimeUnit(_) => "time unit",
            EnvValue::SessionFactory(_) => "session factory",
            EnvValue::Proxy(_) => "proxy",
        }
    }
}

/// Text representation, used by the coercing lookups.
impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvValue::Null => f.write_str("null"),
            EnvValue::String(s) => f.write_str(s),
            EnvValue::Integer(i) => write!(f, "{i}"),
            EnvValue::TimeUnit(unit) => write!(f, "{unit}"),
            EnvValue::SessionFactory(factory) => write!(f, "{factory}"),
            EnvValue::Proxy(proxy) => write!(f, "{proxy}"),
        }
    }
}

impl From<&str> for EnvValue {
    fn from(s: &str) -> Self {
        EnvValue::String(s.to_string())
    }
}

impl From<String> for EnvValue {
    fn from(s: String) -> Self {
        EnvValue::String(s)
    }
}

impl From<i64> for EnvValue {
    fn from(i: i64) -> Self {
        EnvValue::Integer(i)
    }
}

impl From<TimeUnit> for EnvValue {
    fn from(unit: TimeUnit) -> Self {
        EnvValue::TimeUnit(unit)
    }
}

impl From<SessionFactory> for EnvValue {
    fn from(factory: SessionFactory) -> Self {
        EnvValue::SessionFactory(Arc::new(factory))
    }
}

impl From<Arc<SessionFactory>> for EnvValue {
    fn from(factory: Arc<SessionFactory>) -> Self {
        EnvValue::SessionFactory(factory)
    }
}

impl From<Proxy> for EnvValue {
    fn from(proxy: Proxy) -> Self {
        EnvValue::Proxy(proxy)
    }
}

/// Key-to-value configuration map for a filesystem instance.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    entries: HashMap<String, EnvValue>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<EnvValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert an entry, returning the previous value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<EnvValue>) -> Option<EnvValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw value. `None` means absent; a present null is `Some(EnvValue::Null)`.
    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.entries.get(key)
    }

    /// Value as text. Null and absent are both `None`.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.entries.get(key)? {
            EnvValue::Null => None,
            EnvValue::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Value as a base-10 integer.
    pub fn get_long(&self, key: &str) -> Result<Option<i64>, EnvError> {
        match self.entries.get(key) {
            None | Some(EnvValue::Null) => Ok(None),
            Some(EnvValue::Integer(i)) => Ok(Some(*i)),
            Some(other) => {
                let text = other.to_string();
                text.parse::<i64>()
                    .map(Some)
                    .map_err(|source| EnvError::Format {
                        key: key.to_string(),
                        value: text,
                        source,
                    })
            }
        }
    }

    /// Value as a [`TimeUnit`], matching the uppercased text.
    pub fn get_time_unit(&self, key: &str) -> Result<Option<TimeUnit>, EnvError> {
        match self.entries.get(key) {
            None | Some(EnvValue::Null) => Ok(None),
            Some(EnvValue::TimeUnit(unit)) => Ok(Some(*unit)),
            Some(other) => {
                let text = other.to_string();
                TimeUnit::from_str(&text.to_uppercase())
                    .map(Some)
                    .map_err(|_| EnvError::UnknownEnumValue {
                        key: key.to_string(),
                        value: text,
                        kind: "time unit",
                    })
            }
        }
    }

    /// Combine an amount and a unit entry into a [`Duration`].
    ///
    /// `None` when the amount is absent. The unit falls back to
    /// `default_unit` when its key is absent. A negative amount is an error.
    pub fn get_duration(
        &self,
        amount_key: &str,
        unit_key: &str,
        default_unit: TimeUnit,
    ) -> Result<Option<Duration>, EnvError> {
        let Some(amount) = self.get_long(amount_key)? else {
            return Ok(None);
        };
        let amount = u64::try_from(amount).map_err(|_| EnvError::Negative {
            key: amount_key.to_string(),
            value: amount,
        })?;
        let unit = self.get_time_unit(unit_key)?.unwrap_or(default_unit);
        Ok(Some(unit.to_duration(amount)))
    }

    /// Parse an environment from TOML.
    ///
    /// Nested tables flatten into dotted keys, so `[dir] bin = "/usr/bin"`
    /// becomes `dir.bin`. Strings and integers keep their type; other values
    /// are stored as their TOML text.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        let table: toml::Table = s.parse()?;
        let mut env = Self::new();
        flatten_toml(&mut env.entries, None, table);
        Ok(env)
    }

    /// Read and parse a TOML environment file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

fn flatten_toml(entries: &mut HashMap<String, EnvValue>, prefix: Option<&str>, table: toml::Table) {
    for (name, value) in table {
        let key = match prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name,
        };
        let value = match value {
            toml::Value::Table(nested) => {
                flatten_toml(entries, Some(&key), nested);
                continue;
            }
            toml::Value::String(s) => EnvValue::String(s),
            toml::Value::Integer(i) => EnvValue::Integer(i),
            other => EnvValue::String(other.to_string()),
        };
        entries.insert(key, value);
    }
}

impl<K, V> FromIterator<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<EnvValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Self::new();
        env.extend(iter);
        env
    }
}

impl<K, V> Extend<(K, V)> for Environment
where
    K: Into<String>,
    V: Into<EnvValue>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_absent_vs_null() {
        let env = Environment::new().with("present", EnvValue::Null);
        assert_eq!(env.get("present"), Some(&EnvValue::Null));
        assert_eq!(env.get("missing"), None);
        assert!(env.contains_key("present"));
        assert!(!env.contains_key("missing"));
        assert_eq!(env.get_string("present"), None);
        assert_eq!(env.get_long("present").unwrap(), None);
    }

    #[test]
    fn test_get_string_coerces() {
        let env = Environment::new()
            .with("s", "hello")
            .with("i", 42i64)
            .with("u", TimeUnit::Minutes);
        assert_eq!(env.get_string("s").as_deref(), Some("hello"));
        assert_eq!(env.get_string("i").as_deref(), Some("42"));
        assert_eq!(env.get_string("u").as_deref(), Some("MINUTES"));
        assert_eq!(env.get_string("missing"), None);
    }

    #[test]
    fn test_get_long() {
        let env = Environment::new()
            .with("timeout", "30")
            .with("native", 7i64)
            .with("negative", "-12")
            .with("bad", "abc");
        assert_eq!(env.get_long("timeout").unwrap(), Some(30));
        assert_eq!(env.get_long("native").unwrap(), Some(7));
        assert_eq!(env.get_long("negative").unwrap(), Some(-12));
        assert_eq!(env.get_long("missing").unwrap(), None);

        match env.get_long("bad") {
            Err(EnvError::Format { key, value, .. }) => {
                assert_eq!(key, "bad");
                assert_eq!(value, "abc");
            }
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn test_get_long_failure_is_local() {
        let env = Environment::new().with("bad", "abc").with("good", "5");
        assert!(env.get_long("bad").is_err());
        assert_eq!(env.get_long("good").unwrap(), Some(5));
        assert!(env.get_long("bad").is_err());
    }

    #[test]
    fn test_get_time_unit() {
        let env = Environment::new()
            .with("unit", "seconds")
            .with("mixed", "MilliSeconds")
            .with("native", TimeUnit::Hours)
            .with("bad", "lightyears");
        assert_eq!(env.get_time_unit("unit").unwrap(), Some(TimeUnit::Seconds));
        assert_eq!(
            env.get_time_unit("mixed").unwrap(),
            Some(TimeUnit::Milliseconds)
        );
        assert_eq!(env.get_time_unit("native").unwrap(), Some(TimeUnit::Hours));
        assert_eq!(env.get_time_unit("missing").unwrap(), None);

        let err = env.get_time_unit("bad").unwrap_err();
        assert!(matches!(err, EnvError::UnknownEnumValue { ref value, .. } if value == "lightyears"));
    }

    #[test]
    fn test_time_unit_names_round_trip() {
        for unit in TimeUnit::iter() {
            assert_eq!(TimeUnit::from_str(unit.as_str()).unwrap(), unit);
        }
        assert!(TimeUnit::from_str("seconds").is_err());
    }

    #[test]
    fn test_time_unit_to_duration() {
        assert_eq!(TimeUnit::Milliseconds.to_duration(1500), Duration::from_millis(1500));
        assert_eq!(TimeUnit::Minutes.to_duration(2), Duration::from_secs(120));
        assert_eq!(TimeUnit::Days.to_duration(1), Duration::from_secs(86_400));
        assert_eq!(TimeUnit::Days.to_duration(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_get_duration() {
        let env = Environment::new()
            .with("t", 5i64)
            .with("t.unit", "seconds")
            .with("bare", "250");
        assert_eq!(
            env.get_duration("t", "t.unit", TimeUnit::Milliseconds).unwrap(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            env.get_duration("bare", "bare.unit", TimeUnit::Milliseconds).unwrap(),
            Some(Duration::from_millis(250))
        );
        assert_eq!(
            env.get_duration("missing", "missing.unit", TimeUnit::Seconds).unwrap(),
            None
        );
    }

    #[test]
    fn test_get_duration_rejects_negative() {
        let env = Environment::new().with("t", -5i64);
        let err = env.get_duration("t", "t.unit", TimeUnit::Seconds).unwrap_err();
        assert_eq!(
            err,
            EnvError::Negative {
                key: "t".into(),
                value: -5
            }
        );
        assert_eq!(env.get_long("t").unwrap(), Some(-5));
    }

    #[test]
    fn test_from_toml_flattens_tables() {
        let env = Environment::from_toml_str(
            r#"
            proxy = "socks5://bastion:1080"
            "command.ls" = "/opt/busybox/ls"

            [dir]
            bin = "/usr/bin"

            [session.connect]
            timeout = 15
            "timeout.unit" = "seconds"
            "#,
        )
        .unwrap();

        assert_eq!(env.get_string("dir.bin").as_deref(), Some("/usr/bin"));
        assert_eq!(env.get_string("command.ls").as_deref(), Some("/opt/busybox/ls"));
        assert_eq!(env.get("session.connect.timeout"), Some(&EnvValue::Integer(15)));
        assert_eq!(
            env.get_time_unit("session.connect.timeout.unit").unwrap(),
            Some(TimeUnit::Seconds)
        );
        assert_eq!(env.len(), 5);
    }

    #[test]
    fn test_from_toml_non_string_scalars() {
        let env = Environment::from_toml_str("flag = true\nratio = 1.5\n").unwrap();
        assert_eq!(env.get_string("flag").as_deref(), Some("true"));
        assert_eq!(env.get_string("ratio").as_deref(), Some("1.5"));
        assert!(env.get_long("ratio").is_err());
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.toml");
        std::fs::write(&path, "[command]\nstat = \"/usr/local/bin/gstat\"\n").unwrap();

        let env = Environment::from_toml_file(&path).unwrap();
        assert_eq!(
            env.get_string("command.stat").as_deref(),
            Some("/usr/local/bin/gstat")
        );

        let missing = Environment::from_toml_file(dir.path().join("nope.toml"));
        assert_eq!(missing.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_from_iterator() {
        let env: Environment = [("a", "1"), ("b", "2")].into_iter().collect();
        assert_eq!(env.len(), 2);
        assert_eq!(env.get_long("b").unwrap(), Some(2));
    }
}
