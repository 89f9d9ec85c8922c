//! Table properties. These are the string-keyed settings stored in [`TableMetadata`] which govern
//! how commits against the table behave: when manifests get merged, how large merged manifests may
//! grow, whether appended manifests inherit the committing snapshot id, and how hard a writer
//! retries after losing a race on the catalog pointer.
//!
//! Parsing is infallible: a value that does not parse for its key is kept in
//! [`TableProperties::unknown_properties`] and the typed field stays `None`, so the accessor falls
//! back to the default. Write paths use [`validate_property_value`] to reject such values before
//! they are committed.
//!
//! [`TableMetadata`]: crate::table_metadata::TableMetadata

use std::collections::HashMap;
use std::num::NonZero;
use std::time::Duration;

// Table property key constants
pub const MANIFEST_MIN_MERGE_COUNT: &str = "commit.manifest.min-count-to-merge";
pub const MANIFEST_TARGET_SIZE_BYTES: &str = "commit.manifest.target-size-bytes";
pub const MANIFEST_MERGE_ENABLED: &str = "commit.manifest-merge.enabled";
pub const SNAPSHOT_ID_INHERITANCE_ENABLED: &str = "compatibility.snapshot-id-inheritance.enabled";
pub const COMMIT_NUM_RETRIES: &str = "commit.retry.num-retries";
pub const COMMIT_MIN_RETRY_WAIT_MS: &str = "commit.retry.min-wait-ms";
pub const COMMIT_MAX_RETRY_WAIT_MS: &str = "commit.retry.max-wait-ms";
pub const COMMIT_TOTAL_RETRY_TIME_MS: &str = "commit.retry.total-timeout-ms";

pub const MANIFEST_MIN_MERGE_COUNT_DEFAULT: u32 = 100;
pub const MANIFEST_TARGET_SIZE_BYTES_DEFAULT: u64 = 8 * 1024 * 1024;
pub const MANIFEST_MERGE_ENABLED_DEFAULT: bool = true;
pub const SNAPSHOT_ID_INHERITANCE_ENABLED_DEFAULT: bool = false;
pub const COMMIT_NUM_RETRIES_DEFAULT: u32 = 4;
pub const COMMIT_MIN_RETRY_WAIT_MS_DEFAULT: u64 = 100;
pub const COMMIT_MAX_RETRY_WAIT_MS_DEFAULT: u64 = 60 * 1000;
pub const COMMIT_TOTAL_RETRY_TIME_MS_DEFAULT: u64 = 30 * 60 * 1000;

/// Table property definitions: `(KEY_CONST, field, parse block, help message)`. Each consumer
/// macro receives the value identifier followed by the list so that parsing, help messages and
/// validation are all generated from one place.
macro_rules! with_table_properties {
    ($callback:ident, $v:ident) => {
        $callback! {
            $v,
            (
                MANIFEST_MIN_MERGE_COUNT,
                manifest_min_merge_count,
                { Some(parse_non_negative::<u32>($v)?) },
                "needs to be a non-negative integer."
            ),
            (
                MANIFEST_TARGET_SIZE_BYTES,
                manifest_target_size_bytes,
                { Some(parse_positive_int($v)?) },
                "needs to be a positive integer."
            ),
            (
                MANIFEST_MERGE_ENABLED,
                manifest_merge_enabled,
                { Some(parse_bool($v)?) },
                "needs to be 'true' or 'false'."
            ),
            (
                SNAPSHOT_ID_INHERITANCE_ENABLED,
                snapshot_id_inheritance_enabled,
                { Some(parse_bool($v)?) },
                "needs to be 'true' or 'false'."
            ),
            (
                COMMIT_NUM_RETRIES,
                commit_num_retries,
                { Some(parse_non_negative::<u32>($v)?) },
                "needs to be a non-negative integer."
            ),
            (
                COMMIT_MIN_RETRY_WAIT_MS,
                commit_min_retry_wait_ms,
                { Some(parse_non_negative::<u64>($v)?) },
                "needs to be a non-negative number of milliseconds."
            ),
            (
                COMMIT_MAX_RETRY_WAIT_MS,
                commit_max_retry_wait_ms,
                { Some(parse_non_negative::<u64>($v)?) },
                "needs to be a non-negative number of milliseconds."
            ),
            (
                COMMIT_TOTAL_RETRY_TIME_MS,
                commit_total_retry_time_ms,
                { Some(parse_non_negative::<u64>($v)?) },
                "needs to be a non-negative number of milliseconds."
            ),
        }
    };
}
pub(crate) use with_table_properties;

mod deserialize;
pub(crate) use deserialize::validate_property_value;

/// Typed view over the string-keyed properties of a table.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct TableProperties {
    /// Minimum number of manifests in a partition-spec group before the group is bin-packed.
    pub manifest_min_merge_count: Option<u32>,

    /// Upper bound for the accumulated size of manifests combined into one merged manifest.
    pub manifest_target_size_bytes: Option<NonZero<u64>>,

    /// Whether merge appends combine manifests at all.
    pub manifest_merge_enabled: Option<bool>,

    /// Whether entries of appended manifests inherit the id of the snapshot that commits them,
    /// allowing the same manifest blob to be committed without a rewrite.
    pub snapshot_id_inheritance_enabled: Option<bool>,

    /// Number of times a commit is retried after the catalog rejects it.
    pub commit_num_retries: Option<u32>,

    pub commit_min_retry_wait_ms: Option<u64>,
    pub commit_max_retry_wait_ms: Option<u64>,
    pub commit_total_retry_time_ms: Option<u64>,

    /// Properties that are either not recognised or failed to parse.
    pub unknown_properties: HashMap<String, String>,
}

impl TableProperties {
    pub fn manifest_min_merge_count(&self) -> u32 {
        self.manifest_min_merge_count
            .unwrap_or(MANIFEST_MIN_MERGE_COUNT_DEFAULT)
    }

    pub fn manifest_target_size_bytes(&self) -> u64 {
        self.manifest_target_size_bytes
            .map_or(MANIFEST_TARGET_SIZE_BYTES_DEFAULT, NonZero::get)
    }

    pub fn manifest_merge_enabled(&self) -> bool {
        self.manifest_merge_enabled
            .unwrap_or(MANIFEST_MERGE_ENABLED_DEFAULT)
    }

    pub fn snapshot_id_inheritance_enabled(&self) -> bool {
        self.snapshot_id_inheritance_enabled
            .unwrap_or(SNAPSHOT_ID_INHERITANCE_ENABLED_DEFAULT)
    }

    /// The retry budget and backoff for commits against this table.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            num_retries: self.commit_num_retries.unwrap_or(COMMIT_NUM_RETRIES_DEFAULT),
            min_wait: Duration::from_millis(
                self.commit_min_retry_wait_ms
                    .unwrap_or(COMMIT_MIN_RETRY_WAIT_MS_DEFAULT),
            ),
            max_wait: Duration::from_millis(
                self.commit_max_retry_wait_ms
                    .unwrap_or(COMMIT_MAX_RETRY_WAIT_MS_DEFAULT),
            ),
            total_timeout: Duration::from_millis(
                self.commit_total_retry_time_ms
                    .unwrap_or(COMMIT_TOTAL_RETRY_TIME_MS_DEFAULT),
            ),
        }
    }
}

/// Bounded exponential backoff for commit retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub num_retries: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub total_timeout: Duration,
}

impl RetryPolicy {
    /// Total number of commit attempts allowed, the first one included.
    pub fn max_attempts(&self) -> u32 {
        self.num_retries.saturating_add(1)
    }

    /// Wait before retry number `retry` (1-based): doubles from `min_wait`, capped at `max_wait`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.min_wait.saturating_mul(factor).min(self.max_wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_key_unknown_value() {
        let table_properties = TableProperties::from([(MANIFEST_MERGE_ENABLED, "wack")]);
        let unknown_properties =
            HashMap::from([(MANIFEST_MERGE_ENABLED.to_string(), "wack".to_string())]);
        let expected = TableProperties {
            unknown_properties,
            ..Default::default()
        };
        assert_eq!(table_properties, expected);
        assert!(table_properties.manifest_merge_enabled());
    }

    #[test]
    fn allow_unknown_keys() {
        let properties = [("unknown_properties".to_string(), "amazing".to_string())];
        let table_properties = TableProperties::from(properties);
        let unknown_properties = HashMap::from([(
            "unknown_properties".to_string(),
            "amazing".to_string(),
        )]);
        let expected = TableProperties {
            unknown_properties,
            ..Default::default()
        };
        assert_eq!(table_properties, expected);
    }

    #[test]
    fn test_empty_table_properties() {
        let map: HashMap<String, String> = HashMap::new();
        let table_properties = TableProperties::from(map);
        assert_eq!(table_properties, TableProperties::default());
        assert_eq!(table_properties.manifest_min_merge_count(), 100);
        assert_eq!(table_properties.manifest_target_size_bytes(), 8_388_608);
        assert!(table_properties.manifest_merge_enabled());
        assert!(!table_properties.snapshot_id_inheritance_enabled());
        assert_eq!(table_properties.retry_policy().max_attempts(), 5);
    }

    #[test]
    fn test_parse_table_properties() {
        let properties = [
            (MANIFEST_MIN_MERGE_COUNT, "1"),
            (MANIFEST_TARGET_SIZE_BYTES, "10"),
            (MANIFEST_MERGE_ENABLED, "false"),
            (SNAPSHOT_ID_INHERITANCE_ENABLED, "true"),
            (COMMIT_NUM_RETRIES, "2"),
            (COMMIT_MIN_RETRY_WAIT_MS, "0"),
            (COMMIT_MAX_RETRY_WAIT_MS, "5"),
            (COMMIT_TOTAL_RETRY_TIME_MS, "1000"),
        ];
        let actual = TableProperties::from(properties.into_iter());
        let expected = TableProperties {
            manifest_min_merge_count: Some(1),
            manifest_target_size_bytes: NonZero::new(10),
            manifest_merge_enabled: Some(false),
            snapshot_id_inheritance_enabled: Some(true),
            commit_num_retries: Some(2),
            commit_min_retry_wait_ms: Some(0),
            commit_max_retry_wait_ms: Some(5),
            commit_total_retry_time_ms: Some(1000),
            unknown_properties: HashMap::new(),
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn zero_target_size_is_unknown() {
        let actual = TableProperties::from([(MANIFEST_TARGET_SIZE_BYTES, "0")]);
        assert_eq!(actual.manifest_target_size_bytes, None);
        assert_eq!(actual.unknown_properties.len(), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            num_retries: 4,
            min_wait: Duration::from_millis(100),
            max_wait: Duration::from_millis(350),
            total_timeout: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(30), Duration::from_millis(350));
    }
}
