//! Driver options.

use url::Url;

use crate::error::Error;

/// How statements are sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    /// Parse/Bind/Describe/Execute/Sync
    #[default]
    Extended,
    /// A single Query message with parameters inlined as literals
    Simple,
}

/// Wire type used for string parameters without an explicit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringType {
    /// Strings are bound as `varchar`
    #[default]
    Varchar,
    /// Strings are bound as unspecified and the server infers their type
    Unspecified,
}

/// Driver options.
#[derive(Debug, Clone)]
pub struct Opts {
    /// Number of executions of the same SQL text before it is parsed as a
    /// named server-side statement. `0` disables promotion.
    ///
    /// Default: `5`
    pub prepare_threshold: u32,

    /// Maximum number of named statements kept on the server. `0` disables
    /// promotion.
    ///
    /// Default: `256`
    pub statement_cache_capacity: usize,

    /// Merge batches of single-row INSERTs into multi-row INSERTs.
    ///
    /// Default: `false`
    pub rewrite_batched_inserts: bool,

    /// Maximum rows per merged INSERT.
    ///
    /// Default: `128`
    pub max_rewrite_rows: usize,

    /// Default: `QueryMode::Extended`
    pub query_mode: QueryMode,

    /// Whether `'...'` strings treat backslash literally. Updated when the
    /// server reports the setting.
    ///
    /// Default: `true`
    pub standard_conforming_strings: bool,

    /// Request result columns in binary when the type supports it.
    ///
    /// Default: `true`
    pub binary_transfer: bool,

    /// Default: `StringType::Varchar`
    pub string_type: StringType,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            prepare_threshold: 5,
            statement_cache_capacity: 256,
            rewrite_batched_inserts: false,
            max_rewrite_rows: 128,
            query_mode: QueryMode::Extended,
            standard_conforming_strings: true,
            binary_transfer: true,
            string_type: StringType::Varchar,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "True" | "1" | "yes" | "on" => Ok(true),
        "false" | "False" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidUsage(format!("Invalid {}: {}", key, value))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, Error> {
    value
        .parse()
        .map_err(|_| Error::InvalidUsage(format!("Invalid {}: {}", key, value)))
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Read driver options from the query string of a connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&..]`
    ///
    /// Supported query parameters:
    /// - `prepareThreshold` / `prepare_threshold`: non-negative integer
    /// - `preparedStatementCacheQueries` / `statement_cache_capacity`: non-negative integer
    /// - `reWriteBatchedInserts` / `rewrite_batched_inserts`: true/True/1/yes/on or false/False/0/no/off
    /// - `max_rewrite_rows`: positive integer
    /// - `preferQueryMode` / `query_mode`: extended or simple
    /// - `standard_conforming_strings`: boolean
    /// - `binaryTransfer` / `binary_transfer`: boolean
    /// - `stringtype` / `string_type`: varchar or unspecified
    ///
    /// Connection parameters (host, user, sslmode, ...) belong to the transport
    /// and are ignored here.
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "postgresql", "pg"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts::default();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "prepareThreshold" | "prepare_threshold" => {
                    opts.prepare_threshold = parse_number(&key, &value)?;
                }
                "preparedStatementCacheQueries" | "statement_cache_capacity" => {
                    opts.statement_cache_capacity = parse_number(&key, &value)?;
                }
                "reWriteBatchedInserts" | "rewrite_batched_inserts" => {
                    opts.rewrite_batched_inserts = parse_bool(&key, &value)?;
                }
                "max_rewrite_rows" => {
                    opts.max_rewrite_rows = parse_number(&key, &value)?;
                    if opts.max_rewrite_rows == 0 {
                        return Err(Error::InvalidUsage(format!(
                            "Invalid max_rewrite_rows: {}",
                            value
                        )));
                    }
                }
                "preferQueryMode" | "query_mode" => {
                    opts.query_mode = match value.as_ref() {
                        "extended" => QueryMode::Extended,
                        "simple" => QueryMode::Simple,
                        _ => {
                            return Err(Error::InvalidUsage(format!(
                                "Invalid {}: expected one of ['extended', 'simple'], got {}",
                                key, value
                            )));
                        }
                    };
                }
                "standard_conforming_strings" => {
                    opts.standard_conforming_strings = parse_bool(&key, &value)?;
                }
                "binaryTransfer" | "binary_transfer" => {
                    opts.binary_transfer = parse_bool(&key, &value)?;
                }
                "stringtype" | "string_type" => {
                    opts.string_type = match value.as_ref() {
                        "varchar" => StringType::Varchar,
                        "unspecified" => StringType::Unspecified,
                        _ => {
                            return Err(Error::InvalidUsage(format!(
                                "Invalid {}: expected one of ['varchar', 'unspecified'], got {}",
                                key, value
                            )));
                        }
                    };
                }
                _ => {
                    tracing::debug!(key = %key, "ignoring connection parameter");
                }
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let url = Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
        Self::try_from(&url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = Opts::default();
        assert_eq!(opts.prepare_threshold, 5);
        assert_eq!(opts.statement_cache_capacity, 256);
        assert!(!opts.rewrite_batched_inserts);
        assert_eq!(opts.query_mode, QueryMode::Extended);
        assert_eq!(opts.string_type, StringType::Varchar);
    }

    #[test]
    fn test_url_params() {
        let opts = Opts::try_from(
            "postgres://u@localhost/db?prepareThreshold=0&reWriteBatchedInserts=true\
             &preferQueryMode=simple&stringtype=unspecified&binary_transfer=off\
             &max_rewrite_rows=16&statement_cache_capacity=8&sslmode=require",
        )
        .unwrap();
        assert_eq!(opts.prepare_threshold, 0);
        assert!(opts.rewrite_batched_inserts);
        assert_eq!(opts.query_mode, QueryMode::Simple);
        assert_eq!(opts.string_type, StringType::Unspecified);
        assert!(!opts.binary_transfer);
        assert_eq!(opts.max_rewrite_rows, 16);
        assert_eq!(opts.statement_cache_capacity, 8);
    }

    #[test]
    fn test_invalid_values() {
        for url in [
            "postgres://localhost?prepareThreshold=-1",
            "postgres://localhost?reWriteBatchedInserts=maybe",
            "postgres://localhost?preferQueryMode=fast",
            "postgres://localhost?max_rewrite_rows=0",
            "mysql://localhost",
        ] {
            let err = Opts::try_from(url).unwrap_err();
            assert!(matches!(err, Error::InvalidUsage(_)), "{url}");
        }
    }
}
