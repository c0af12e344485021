//! Classification of driver errors into the store error taxonomy.

use brainstore_types::error::StoreError;

/// SQLSTATEs meaning a referenced table, column, type or operator is absent.
const SCHEMA_MISMATCH_CODES: &[&str] = &[
    "42703", // undefined_column
    "42P01", // undefined_table
    "42704", // undefined_object
    "42883", // undefined_function (e.g. `<=>` without the vector extension)
];

/// Map a `sqlx::Error` to the matching [`StoreError`] category.
pub fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = sqlstate(&err).unwrap_or_default();
            if SCHEMA_MISMATCH_CODES.contains(&code.as_str()) {
                StoreError::SchemaMismatch(db.message().to_string())
            } else if code.starts_with("23") {
                StoreError::Constraint(db.message().to_string())
            } else {
                StoreError::Query(format!("[{code}] {}", db.message()))
            }
        }
        sqlx::Error::ColumnNotFound(column) => {
            StoreError::SchemaMismatch(format!("column \"{column}\" not found in result"))
        }
        sqlx::Error::PoolTimedOut => StoreError::PoolTimeout,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed => {
            StoreError::Connection(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(err.to_string())
        }
        _ => StoreError::Query(err.to_string()),
    }
}

/// SQLSTATE of a database error, if the error came from the server.
fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|c| c.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_maps_to_pool_timeout() {
        assert!(matches!(
            classify(sqlx::Error::PoolTimedOut),
            StoreError::PoolTimeout
        ));
    }

    #[test]
    fn test_closed_pool_is_connection_error() {
        let err = classify(sqlx::Error::PoolClosed);
        assert!(matches!(err, StoreError::Connection(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_io_error_is_connection_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            classify(sqlx::Error::Io(io)),
            StoreError::Connection(_)
        ));
    }

    #[test]
    fn test_missing_result_column_is_schema_mismatch() {
        let err = classify(sqlx::Error::ColumnNotFound("search_vector".into()));
        assert_eq!(err.code(), "SCHEMA_MISMATCH");
        assert!(err.to_string().contains("search_vector"));
    }

    #[test]
    fn test_row_not_found_is_query_error() {
        assert!(matches!(
            classify(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
    }

    #[test]
    fn test_sqlstate_absent_for_client_errors() {
        assert!(sqlstate(&sqlx::Error::PoolTimedOut).is_none());
    }
}
