//! Well-known credentials
//!
//! The fixed set of keys that setup walks through, `verify` reports on, and
//! the materializer exports. Project scaffolding and CI setup read these by
//! environment variable name.

use serde::Serialize;

/// Grouping used by the setup walkthrough
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SourceControl,
    Cloud,
    Database,
    Ai,
    Registry,
}

impl Category {
    pub fn title(self) -> &'static str {
        match self {
            Self::SourceControl => "Source control",
            Self::Cloud => "Cloud",
            Self::Database => "Databases",
            Self::Ai => "AI providers",
            Self::Registry => "Package registries",
        }
    }

    pub const ALL: [Category; 5] = [
        Self::SourceControl,
        Self::Cloud,
        Self::Database,
        Self::Ai,
        Self::Registry,
    ];
}

/// A credential devkit knows how to ask for and export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KnownCredential {
    /// Store key
    pub key: &'static str,
    /// Environment variable it is exported as
    pub env_var: &'static str,
    pub description: &'static str,
    pub category: Category,
    /// Hidden input when prompting
    pub secret: bool,
}

const fn known(
    key: &'static str,
    env_var: &'static str,
    description: &'static str,
    category: Category,
    secret: bool,
) -> KnownCredential {
    KnownCredential {
        key,
        env_var,
        description,
        category,
        secret,
    }
}

pub const KNOWN_CREDENTIALS: &[KnownCredential] = &[
    known("github_token", "GITHUB_TOKEN", "GitHub personal access token", Category::SourceControl, true),
    known("github_org", "GITHUB_ORG", "Default GitHub organization", Category::SourceControl, false),
    known("aws_access_key_id", "AWS_ACCESS_KEY_ID", "AWS access key ID", Category::Cloud, false),
    known("aws_secret_access_key", "AWS_SECRET_ACCESS_KEY", "AWS secret access key", Category::Cloud, true),
    known("aws_region", "AWS_DEFAULT_REGION", "AWS default region", Category::Cloud, false),
    known("database_url", "DATABASE_URL", "Default database connection URL", Category::Database, true),
    known("redis_url", "REDIS_URL", "Redis connection URL", Category::Database, true),
    known("openai_api_key", "OPENAI_API_KEY", "OpenAI API key", Category::Ai, true),
    known("anthropic_api_key", "ANTHROPIC_API_KEY", "Anthropic API key", Category::Ai, true),
    known("npm_token", "NPM_TOKEN", "npm registry token", Category::Registry, true),
    known("docker_hub_token", "DOCKER_HUB_TOKEN", "Docker Hub access token", Category::Registry, true),
];

/// Look up a known credential by store key
pub fn by_key(key: &str) -> Option<&'static KnownCredential> {
    KNOWN_CREDENTIALS.iter().find(|c| c.key == key)
}

/// Known credentials in one category, in table order
pub fn in_category(category: Category) -> impl Iterator<Item = &'static KnownCredential> {
    KNOWN_CREDENTIALS.iter().filter(move |c| c.category == category)
}

/// Environment variable name for an arbitrary key ("db.prod" -> "DB_PROD").
///
/// Names that would start with a digit get a leading `_` ("1password" ->
/// "_1PASSWORD"). Distinct keys can still map to one name ("db.url" and
/// "db_url"); the materializer reports those.
pub fn env_var_for(key: &str) -> String {
    if let Some(known) = by_key(key) {
        return known.env_var.to_string();
    }
    let name = key.replace(['.', '-'], "_").to_uppercase();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}", name)
    } else {
        name
    }
}

/// Whether `name` is a portable shell identifier (`[A-Za-z_][A-Za-z0-9_]*`)
pub fn is_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::validate_key;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_valid_and_unique() {
        let mut keys = HashSet::new();
        let mut vars = HashSet::new();
        for c in KNOWN_CREDENTIALS {
            assert!(validate_key(c.key).is_ok(), "{}", c.key);
            assert!(keys.insert(c.key), "duplicate key {}", c.key);
            assert!(vars.insert(c.env_var), "duplicate env var {}", c.env_var);
            assert!(is_env_var_name(c.env_var), "{}", c.env_var);
        }
    }

    #[test]
    fn test_every_category_has_members() {
        for category in Category::ALL {
            assert!(in_category(category).next().is_some(), "{:?}", category);
        }
    }

    #[test]
    fn test_lookups() {
        assert_eq!(by_key("github_token").unwrap().env_var, "GITHUB_TOKEN");
        assert!(by_key("nope").is_none());
    }

    #[test]
    fn test_env_var_conversion() {
        assert_eq!(env_var_for("aws_region"), "AWS_DEFAULT_REGION");
        assert_eq!(env_var_for("db.prod-replica"), "DB_PROD_REPLICA");
        assert_eq!(env_var_for("1password"), "_1PASSWORD");
        assert!(is_env_var_name(&env_var_for("1password")));
    }

    #[test]
    fn test_env_var_names() {
        for name in ["GITHUB_TOKEN", "_1PASSWORD", "a", "_"] {
            assert!(is_env_var_name(name), "{name} should be valid");
        }
        for name in ["", "1PASSWORD", "DB.URL", "A-B", "X Y"] {
            assert!(!is_env_var_name(name), "{name} should be invalid");
        }
    }
}
