//! Standard paths used by devkit tools

use std::path::PathBuf;

/// Standard devkit paths
pub struct Paths {
    /// Data directory (~/.local/share/devkit)
    pub data: PathBuf,
    /// Config directory (~/.config/devkit)
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("devkit");

        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("devkit");

        Self { data, config }
    }

    /// Get state directory for a tool
    pub fn state(&self, tool: &str) -> PathBuf {
        self.data.join(tool)
    }

    /// Path of the global config file
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.json")
    }

    /// Default location of the encrypted credential store
    pub fn credentials(&self) -> PathBuf {
        self.state("credentials")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_under_data_dir() {
        let paths = Paths::new();
        assert!(paths.credentials().starts_with(&paths.data));
        assert!(paths.credentials().ends_with("credentials"));
    }

    #[test]
    fn test_config_file_name() {
        let paths = Paths::new();
        assert_eq!(paths.config_file().file_name().unwrap(), "config.json");
    }
}
