use tidemark_config::Config;
use tidemark_driver::Dialect;

/// SQL text for PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `"schema"."table"`
fn qualified(config: &Config, table: &str) -> String {
    format!("{}.{}", quote(&config.schema_name), quote(table))
}

impl Dialect for PostgresDialect {
    fn database_name_query(&self) -> &'static str {
        "SELECT current_database()"
    }

    fn schema_name_query(&self) -> &'static str {
        "SELECT current_schema()"
    }

    fn create_version_table(&self, config: &Config) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (version bigint NOT NULL PRIMARY KEY, dirty boolean NOT NULL)",
            qualified(config, &config.migrations_table)
        )
    }

    fn select_version(&self, config: &Config) -> String {
        format!(
            "SELECT version, dirty FROM {} LIMIT 1",
            qualified(config, &config.migrations_table)
        )
    }

    fn clear_versions(&self, config: &Config) -> String {
        format!("TRUNCATE {}", qualified(config, &config.migrations_table))
    }

    fn insert_version(&self, config: &Config, version: i64, dirty: bool) -> String {
        format!(
            "INSERT INTO {} (version, dirty) VALUES ({version}, {})",
            qualified(config, &config.migrations_table),
            if dirty { "TRUE" } else { "FALSE" }
        )
    }

    fn list_tables(&self, _config: &Config) -> String {
        "SELECT table_name FROM information_schema.tables \
         WHERE table_schema = (SELECT current_schema()) AND table_type = 'BASE TABLE'"
            .into()
    }

    fn drop_table(&self, config: &Config, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE", qualified(config, table))
    }
}
