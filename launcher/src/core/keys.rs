//! Configuration keys recognized by the launcher.

/// Directory scanned by auto-deploy. Overrides the environment's default.
pub const DEPLOY_DIR: &str = "launcher.auto.deploy.dir";
/// Comma-separated auto-deploy actions (`install`, `update`, `start`, `uninstall`).
pub const DEPLOY_ACTION: &str = "launcher.auto.deploy.action";
/// Start tier assigned to auto-deployed modules.
pub const DEPLOY_START_TIER: &str = "launcher.auto.deploy.startlevel";
/// Prefix of auto-install location lists (`launcher.auto.install[.N]`).
pub const AUTO_INSTALL: &str = "launcher.auto.install";
/// Prefix of auto-start location lists (`launcher.auto.start[.N]`).
pub const AUTO_START: &str = "launcher.auto.start";
/// Set to `false` to skip registering the shutdown hook.
pub const SHUTDOWN_HOOK: &str = "launcher.shutdown.hook";
/// Location of the configuration properties file.
pub const CONFIG_PROPERTIES: &str = "launcher.config.properties";
/// Location of the system properties file.
pub const SYSTEM_PROPERTIES: &str = "launcher.system.properties";
/// Runtime storage (module cache) location.
pub const RUNTIME_STORAGE: &str = "runtime.storage";
/// Initial start tier of the bookkeeping runtime.
pub const RUNTIME_INITIAL_TIER: &str = "runtime.startlevel.module";

/// Default file names looked up in the environment's conf directory.
pub const CONFIG_PROPERTIES_FILE: &str = "config.properties";
pub const SYSTEM_PROPERTIES_FILE: &str = "system.properties";

/// Process-wide settings with these prefixes are copied into the configuration.
pub const COPIED_SETTING_PREFIXES: [&str; 2] = ["launcher.", "runtime."];

/// Environment variables with these prefixes are also exposed as dotted keys
/// (`LAUNCHER_AUTO_DEPLOY_DIR` -> `launcher.auto.deploy.dir`).
pub const MAPPED_ENV_PREFIXES: [&str; 2] = ["LAUNCHER_", "RUNTIME_"];

/// Map an environment variable name to its dotted setting key, if it carries
/// one of [`MAPPED_ENV_PREFIXES`].
pub fn env_var_to_key(name: &str) -> Option<String> {
    MAPPED_ENV_PREFIXES
        .iter()
        .any(|prefix| name.starts_with(prefix))
        .then(|| name.to_ascii_lowercase().replace('_', "."))
}

/// True if `key` is copied from process-wide settings into the configuration.
pub fn is_copied_setting(key: &str) -> bool {
    COPIED_SETTING_PREFIXES
        .iter()
        .any(|prefix| key.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_vars_map_to_dotted_keys() {
        assert_eq!(
            env_var_to_key("LAUNCHER_AUTO_DEPLOY_DIR").as_deref(),
            Some(DEPLOY_DIR)
        );
        assert_eq!(
            env_var_to_key("RUNTIME_STORAGE").as_deref(),
            Some(RUNTIME_STORAGE)
        );
        assert_eq!(env_var_to_key("HOME"), None);
    }

    #[test]
    fn only_recognized_prefixes_are_copied() {
        assert!(is_copied_setting("launcher.shutdown.hook"));
        assert!(is_copied_setting("runtime.storage"));
        assert!(!is_copied_setting("HOME"));
        assert!(!is_copied_setting("http.proxyHost"));
    }
}
