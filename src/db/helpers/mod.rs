use std::convert::TryFrom;

use anyhow::{anyhow, Result};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_counters_are_rejected() {
        assert_eq!(to_u64(42, "elapsed_seconds").unwrap(), 42);
        let err = to_u64(-1, "elapsed_seconds").unwrap_err();
        assert!(err.to_string().contains("elapsed_seconds"));
    }

    #[test]
    fn oversized_counters_are_rejected() {
        assert!(to_i64(u64::MAX).is_err());
        assert_eq!(to_i64(65).unwrap(), 65);
    }
}
