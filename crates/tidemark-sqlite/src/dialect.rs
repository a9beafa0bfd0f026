use tidemark_config::Config;
use tidemark_driver::Dialect;

/// SQL text for SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

/// Quote an identifier, doubling embedded quotes.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

impl Dialect for SqliteDialect {
    fn database_name_query(&self) -> &'static str {
        "SELECT COALESCE(NULLIF(file, ''), ':memory:') FROM pragma_database_list WHERE name = 'main'"
    }

    fn schema_name_query(&self) -> &'static str {
        "SELECT name FROM pragma_database_list WHERE seq = 0"
    }

    fn create_version_table(&self, config: &Config) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (version INTEGER NOT NULL PRIMARY KEY, dirty INTEGER NOT NULL)",
            quote(&config.migrations_table)
        )
    }

    fn select_version(&self, config: &Config) -> String {
        format!(
            "SELECT version, dirty FROM {} LIMIT 1",
            quote(&config.migrations_table)
        )
    }

    fn clear_versions(&self, config: &Config) -> String {
        format!("DELETE FROM {}", quote(&config.migrations_table))
    }

    fn insert_version(&self, config: &Config, version: i64, dirty: bool) -> String {
        format!(
            "INSERT INTO {} (version, dirty) VALUES ({version}, {})",
            quote(&config.migrations_table),
            u8::from(dirty)
        )
    }

    fn list_tables(&self, _config: &Config) -> String {
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'".into()
    }

    fn drop_table(&self, _config: &Config, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", quote(table))
    }
}
