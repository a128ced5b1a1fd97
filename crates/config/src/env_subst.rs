use std::sync::LazyLock;

use regex::{Captures, Regex};

/// `${NAME}` where NAME is a valid environment variable identifier.
#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex")
});

/// Replace `${ENV_VAR}` placeholders in raw config text.
///
/// Placeholders whose variable is unset, and anything that does not match
/// the `${IDENT}` shape, pass through untouched.
pub fn substitute_env(input: &str) -> String {
    expand(input, |name| std::env::var(name).ok())
}

fn expand(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    PLACEHOLDER
        .replace_all(input, |caps: &Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
