//! Simple functions to deserialize table properties from strings. This lets [`TableProperties`]
//! expose plain types (`bool`, `u32`, ...) instead of wrapper types implementing `Deserialize`.
use std::num::NonZero;

use super::*;

impl<K, V, I> From<I> for TableProperties
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str> + Into<String>,
    V: AsRef<str> + Into<String>,
{
    fn from(unparsed: I) -> Self {
        let mut props = TableProperties::default();
        let unparsed = unparsed.into_iter().filter(|(k, v)| {
            // Only keep elements that fail to parse
            try_parse(&mut props, k.as_ref(), v.as_ref()).is_none()
        });
        props.unknown_properties = unparsed.map(|(k, v)| (k.into(), v.into())).collect();
        props
    }
}

/// Generates the `try_parse` function from the property definitions in
/// [`with_table_properties!`]. A value whose parse block yields `None` makes `try_parse` return
/// `None`, which leaves the pair in `unknown_properties`.
macro_rules! generate_try_parse {
    ($v:ident, $(($const_name:ident, $field:ident, $parse:block, $_help:expr)),* $(,)?) => {
        // Attempt to parse a key-value pair into a `TableProperties` struct. Returns Some(()) if
        // the key was successfully parsed, and None otherwise.
        fn try_parse(props: &mut TableProperties, k: &str, $v: &str) -> Option<()> {
            match k {
                $($const_name => props.$field = $parse,)*
                _ => return None,
            }
            Some(())
        }
    };
}

with_table_properties!(generate_try_parse, v);

/// Generates the `property_help_message` function that describes what constitutes a valid value
/// for a known key.
macro_rules! generate_help_messages {
    ($_v:ident, $(($const_name:ident, $_field:ident, $_parse:block, $help:expr)),* $(,)?) => {
        fn property_help_message(key: &str) -> Option<&'static str> {
            match key {
                $($const_name => Some($help),)*
                _ => None,
            }
        }
    };
}

with_table_properties!(generate_help_messages, v);

/// Validates that a string value is valid for a given table property key. Unknown keys are always
/// valid; a known key whose value does not parse yields a message that includes the help text.
///
/// Intended for write paths (property updates, table creation) so that a bad value is rejected
/// before it is committed rather than silently ignored on every later read.
pub(crate) fn validate_property_value(key: &str, value: &str) -> Result<(), String> {
    let mut temp = TableProperties::default();
    if try_parse(&mut temp, key, value).is_some() {
        return Ok(());
    }
    match property_help_message(key) {
        Some(help) => Err(format!(
            "Invalid value '{value}' for table property '{key}': {help}"
        )),
        None => Ok(()),
    }
}

/// Deserialize a string representing a positive integer into an `Option<NonZero<u64>>`. Returns
/// `Some` if successfully parses, and `None` otherwise.
pub(crate) fn parse_positive_int(s: &str) -> Option<NonZero<u64>> {
    // parse as non-negative and verify the result is non-zero
    NonZero::new(parse_non_negative(s)?)
}

/// Deserialize a string representing a non-negative integer. Returns `Some` if successfully
/// parses and fits the target type, and `None` otherwise.
pub(crate) fn parse_non_negative<T>(s: &str) -> Option<T>
where
    i64: TryInto<T>,
{
    // parse to i64 since other writers of these properties only use signed longs
    let n: i64 = s.parse().ok().filter(|&i| i >= 0)?;
    n.try_into().ok()
}

/// Deserialize a string representing a boolean into an `Option<bool>`. Returns `Some` if
/// successfully parses, and `None` otherwise.
pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true").unwrap());
        assert!(!parse_bool("false").unwrap());
        assert_eq!(parse_bool("whatever"), None);
    }

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_positive_int("12").unwrap().get(), 12);
        assert_eq!(parse_positive_int("0"), None);
        assert_eq!(parse_positive_int("-12"), None);
        assert_eq!(parse_non_negative::<u64>("0").unwrap(), 0);
        assert_eq!(parse_non_negative::<u32>("12").unwrap(), 12);
        assert_eq!(parse_non_negative::<u32>("-12"), None);
        assert_eq!(parse_non_negative::<u32>("8589934592"), None);
    }

    #[test]
    fn validate_known_and_unknown_keys() {
        assert!(validate_property_value(MANIFEST_MIN_MERGE_COUNT, "4").is_ok());
        assert!(validate_property_value("some.other.key", "anything").is_ok());
        let err = validate_property_value(MANIFEST_MERGE_ENABLED, "yes").unwrap_err();
        assert_eq!(
            err,
            "Invalid value 'yes' for table property 'commit.manifest-merge.enabled': \
             needs to be 'true' or 'false'."
        );
    }
}
