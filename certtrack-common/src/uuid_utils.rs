//! UUID utilities

use uuid::Uuid;

/// Parse a UUID stored as TEXT in the database
pub fn parse_column(column: &str, value: &str) -> crate::Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| crate::Error::Internal(format!("Invalid UUID in column {}: {}", column, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_column_accepts_hyphenated() {
        let id = Uuid::new_v4();
        assert_eq!(parse_column("id", &id.to_string()).unwrap(), id);
    }

    #[test]
    fn test_parse_column_reports_column_name() {
        let err = parse_column("enrollment_id", "not-a-uuid").unwrap_err();
        assert!(err.to_string().contains("enrollment_id"));
    }
}
