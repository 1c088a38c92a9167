use std::env;
use std::error;
use std::str::FromStr;

use log::warn;

/// Prefix shared by every environment setting of this crate.
pub const PREFIX: &str = "PHYSICAL_PLAN_";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("value of {0:?} environment variable is not valid UTF-8")]
    NotUtf8(String),

    #[error("couldn't parse the value of {0:?} environment variable: {1}")]
    ParsingFailed(String, #[source] Box<dyn error::Error + Send + Sync>),
}

/// Full name of the setting `suffix`, e.g. `UNIFIER_LIMIT`.
pub fn var_name(suffix: &str) -> String {
    format!("{PREFIX}{suffix}")
}

/// Reads the setting `suffix`. Unset and blank variables both yield `None`;
/// surrounding whitespace is ignored.
pub fn parse_setting<T: FromStr>(suffix: &str) -> Result<Option<T>, Error>
where
    T::Err: error::Error + Send + Sync + 'static,
{
    let name = var_name(suffix);
    let Some(value) = env::var_os(&name) else {
        return Ok(None);
    };
    let value = value.into_string().map_err(|_| Error::NotUtf8(name.clone()))?;
    let value = value.trim();
    if value.is_empty() {
        warn!("{name} is set but empty, ignoring");
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|err| Error::ParsingFailed(name, Box::new(err)))
}
