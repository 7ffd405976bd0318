//! `${VAR}` substitution for savegame path templates

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Variable name to value mapping used while expanding templates
pub type Variables = BTreeMap<String, String>;

fn placeholder_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}") {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!("Invalid placeholder pattern: {}", e);
            None
        }
    })
    .as_ref()
}

/// Expand every `${NAME}` in `template`.
///
/// Unknown names are left in place.
pub fn expand(template: &str, variables: &Variables) -> String {
    let Some(re) = placeholder_regex() else {
        return template.to_string();
    };
    re.replace_all(template, |caps: &Captures<'_>| match variables.get(&caps[1]) {
        Some(value) => value.clone(),
        None => {
            tracing::debug!("Unknown variable ${{{}}} in {:?}", &caps[1], template);
            caps[0].to_string()
        }
    })
    .into_owned()
}

/// Merge variable layers; later layers override earlier ones
pub fn merge<'a>(layers: impl IntoIterator<Item = &'a Variables>) -> Variables {
    let mut merged = Variables::new();
    for layer in layers {
        merged.extend(layer.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    merged
}
