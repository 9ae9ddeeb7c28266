//! SQL dialect selection from the RDS engine name

use serde::Serialize;

/// SQL dialect spoken by a temporary cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineDialect {
    MySql,
    Postgres,
}

impl EngineDialect {
    /// Map an RDS engine string to a dialect.
    ///
    /// Returns `None` for engines mascaras does not know about; callers fall
    /// back to [`EngineDialect::MySql`] and warn.
    pub fn from_engine(engine: &str) -> Option<Self> {
        match engine {
            "aurora" | "aurora-mysql" | "mysql" => Some(Self::MySql),
            "aurora-postgresql" | "postgres" => Some(Self::Postgres),
            _ => None,
        }
    }

    /// Like [`EngineDialect::from_engine`] but never fails.
    pub fn from_engine_or_default(engine: &str) -> Self {
        Self::from_engine(engine).unwrap_or_default()
    }

    pub fn default_port(self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::Postgres => 5432,
        }
    }
}

impl Default for EngineDialect {
    fn default() -> Self {
        Self::MySql
    }
}

impl std::fmt::Display for EngineDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MySql => f.write_str("mysql"),
            Self::Postgres => f.write_str("postgresql"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_mysql_engines() {
        for engine in ["aurora", "aurora-mysql", "mysql"] {
            assert_eq!(
                EngineDialect::from_engine(engine),
                Some(EngineDialect::MySql),
                "engine {engine}"
            );
        }
    }

    #[test]
    fn known_postgres_engines() {
        for engine in ["aurora-postgresql", "postgres"] {
            assert_eq!(
                EngineDialect::from_engine(engine),
                Some(EngineDialect::Postgres),
                "engine {engine}"
            );
        }
    }

    #[test]
    fn unknown_engine_defaults_to_mysql() {
        assert_eq!(EngineDialect::from_engine("neptune"), None);
        assert_eq!(
            EngineDialect::from_engine_or_default("neptune"),
            EngineDialect::MySql
        );
    }

    #[test]
    fn default_ports() {
        assert_eq!(EngineDialect::MySql.default_port(), 3306);
        assert_eq!(EngineDialect::Postgres.default_port(), 5432);
    }
}
