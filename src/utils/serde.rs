//! Serde helpers shared by the flow, context and workflow spec types.

use serde::{Deserialize, Deserializer};

/// Deserialize a field that may be missing *or* explicitly `null`, falling
/// back to the type's default in both cases.
///
/// Evaluation contexts handed over by external evaluators are often partial:
///
/// ```json
/// {"tasks": null}
/// {"tasks": {}}
/// {}
/// ```
///
/// all describe an empty pointer index.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Deserialize either a single string or a list of strings into a list.
///
/// Transitions accept `do: t2` as shorthand for `do: [t2]`.
pub fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
    })
}
