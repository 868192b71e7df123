//! Environment variable source: CONTENTREPO prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

pub const ENV_PREFIX: &str = "CONTENTREPO";

/// Add the environment overlay to `builder`.
///
/// `CONTENTREPO__STORAGE__DATABASE_URL` sets `storage.database_url`.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("backup.ignored_paths")
            .try_parsing(true),
    );
    Ok(builder)
}
