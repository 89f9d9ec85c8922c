//! Various utility functions/macros used throughout the kernel
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, KernelResult};

pub(crate) mod bin_packing;

/// convenient way to return an error if a condition isn't true
macro_rules! require {
    ( $cond:expr, $err:expr ) => {
        if !($cond) {
            return Err($err);
        }
    };
}

pub(crate) use require;

/// Milliseconds since the unix epoch, as stored in snapshot and metadata timestamps.
pub(crate) fn current_time_ms() -> KernelResult<i64> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::generic(format!("System time before unix epoch: {e}")))?
        .as_millis();
    i64::try_from(millis).map_err(|_| Error::generic("Current time does not fit in i64 millis"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_positive(n: i32) -> KernelResult<i32> {
        require!(n > 0, Error::generic(format!("{n} is not positive")));
        Ok(n)
    }

    #[test]
    fn require_returns_error_when_false() {
        assert_eq!(check_positive(3).unwrap(), 3);
        assert!(check_positive(-1)
            .unwrap_err()
            .to_string()
            .contains("-1 is not positive"));
    }

    #[test]
    fn current_time_is_after_2020() {
        assert!(current_time_ms().unwrap() > 1_577_836_800_000);
    }
}
