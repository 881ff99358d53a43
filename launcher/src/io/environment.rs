//! Launch environments: where configuration files and module packages live.
//!
//! [`FilesystemEnvironment`] serves a plain directory layout (`conf/`,
//! `modules/`). [`ResourceTreeEnvironment`] serves a packaged application
//! archive (`/conf`, `/modules`), with properties file locations that may
//! point either into the archive or at a `file:` URL.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::core::keys::{
    CONFIG_PROPERTIES, CONFIG_PROPERTIES_FILE, SYSTEM_PROPERTIES, SYSTEM_PROPERTIES_FILE,
};
use crate::error::{ConfigError, PropertiesKind};
use crate::io::resource_tree::ResourceTree;
use crate::io::settings::ProcessSettings;
use crate::io::source::{DirectorySource, ModuleSource, ResourceTreeSource};

/// Host-specific collaborators of a launch.
pub trait LaunchEnvironment: Send + Sync {
    /// Directory auto-deploy scans when none is configured.
    fn default_deploy_dir(&self) -> String;

    /// Text of the properties file of `kind`. `Ok(None)` means there is no
    /// such file, which callers treat as empty properties.
    fn read_properties(
        &self,
        kind: PropertiesKind,
        settings: &ProcessSettings,
    ) -> Result<Option<String>, ConfigError>;

    fn module_source(&self) -> Arc<dyn ModuleSource>;
}

/// A custom properties location, as named by a setting.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CustomLocation {
    File(PathBuf),
    Relative(String),
}

fn location_key(kind: PropertiesKind) -> &'static str {
    match kind {
        PropertiesKind::System => SYSTEM_PROPERTIES,
        PropertiesKind::Config => CONFIG_PROPERTIES,
    }
}

fn default_file_name(kind: PropertiesKind) -> &'static str {
    match kind {
        PropertiesKind::System => SYSTEM_PROPERTIES_FILE,
        PropertiesKind::Config => CONFIG_PROPERTIES_FILE,
    }
}

/// Interpret a location setting: an absolute URL must use the `file` scheme;
/// anything that is not a URL is a relative location.
fn parse_location(kind: PropertiesKind, location: &str) -> Result<CustomLocation, ConfigError> {
    let malformed = |reason: String| ConfigError::MalformedLocation {
        kind,
        location: location.to_string(),
        reason,
    };

    let url = match Url::parse(location) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            return Ok(CustomLocation::Relative(location.to_string()));
        }
        Err(err) => return Err(malformed(err.to_string())),
    };
    // Single-letter schemes are drive letters of Windows paths.
    if url.scheme().len() == 1 {
        return Ok(CustomLocation::Relative(location.to_string()));
    }
    if url.scheme() != "file" {
        return Err(malformed(format!("unsupported scheme '{}'", url.scheme())));
    }
    url.to_file_path()
        .map(CustomLocation::File)
        .map_err(|()| malformed("not a local file path".to_string()))
}

/// Read a properties file. A missing file is `Ok(None)`.
fn read_file(kind: PropertiesKind, path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!(kind = %kind, path = %path.display(), "read properties file");
            Ok(Some(text))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Unreadable {
            kind,
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Plain directory layout rooted at `root`.
#[derive(Debug, Clone)]
pub struct FilesystemEnvironment {
    root: PathBuf,
    source: Arc<DirectorySource>,
}

impl FilesystemEnvironment {
    pub const CONF_DIR: &'static str = "conf";
    pub const DEPLOY_DIR: &'static str = "modules";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let source = Arc::new(DirectorySource::new(root.clone()));
        Self { root, source }
    }
}

impl LaunchEnvironment for FilesystemEnvironment {
    fn default_deploy_dir(&self) -> String {
        Self::DEPLOY_DIR.to_string()
    }

    fn read_properties(
        &self,
        kind: PropertiesKind,
        settings: &ProcessSettings,
    ) -> Result<Option<String>, ConfigError> {
        let path = match settings.get(location_key(kind)) {
            Some(custom) => match parse_location(kind, custom)? {
                CustomLocation::File(path) => path,
                CustomLocation::Relative(path) => self.root.join(path),
            },
            None => self
                .root
                .join(Self::CONF_DIR)
                .join(default_file_name(kind)),
        };
        read_file(kind, &path)
    }

    fn module_source(&self) -> Arc<dyn ModuleSource> {
        self.source.clone()
    }
}

/// Packaged application archive held in memory.
#[derive(Debug, Clone)]
pub struct ResourceTreeEnvironment {
    tree: Arc<ResourceTree>,
    source: Arc<ResourceTreeSource>,
}

impl ResourceTreeEnvironment {
    pub const CONF_DIR: &'static str = "/conf";
    pub const DEPLOY_DIR: &'static str = "/modules";

    pub fn new(tree: ResourceTree) -> Self {
        let tree = Arc::new(tree);
        let source = Arc::new(ResourceTreeSource::new(Arc::clone(&tree)));
        Self { tree, source }
    }

    fn tree_text(&self, kind: PropertiesKind, path: &str) -> Result<Option<String>, ConfigError> {
        let Some(bytes) = self.tree.get(path) else {
            return Ok(None);
        };
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|err| ConfigError::Syntax {
                kind,
                line: 0,
                reason: format!("{path} is not valid UTF-8: {err}"),
            })
    }
}

impl LaunchEnvironment for ResourceTreeEnvironment {
    fn default_deploy_dir(&self) -> String {
        Self::DEPLOY_DIR.to_string()
    }

    fn read_properties(
        &self,
        kind: PropertiesKind,
        settings: &ProcessSettings,
    ) -> Result<Option<String>, ConfigError> {
        let Some(custom) = settings.get(location_key(kind)) else {
            let path = format!("{}/{}", Self::CONF_DIR, default_file_name(kind));
            return self.tree_text(kind, &path);
        };

        match parse_location(kind, custom)? {
            CustomLocation::File(path) => read_file(kind, &path),
            CustomLocation::Relative(path) => {
                self.tree_text(kind, &path)?
                    .map(Some)
                    .ok_or_else(|| ConfigError::NotFound {
                        kind,
                        location: custom.to_string(),
                    })
            }
        }
    }

    fn module_source(&self) -> Arc<dyn ModuleSource> {
        self.source.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filesystem_reads_default_conf_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(temp.path().join("conf")).expect("mkdir");
        std::fs::write(temp.path().join("conf/config.properties"), "a=1\n").expect("write");

        let env = FilesystemEnvironment::new(temp.path());
        let settings = ProcessSettings::new();
        let text = env
            .read_properties(PropertiesKind::Config, &settings)
            .expect("read");
        assert_eq!(text.as_deref(), Some("a=1\n"));
        assert_eq!(
            env.read_properties(PropertiesKind::System, &settings)
                .expect("read"),
            None
        );
    }

    #[test]
    fn filesystem_follows_file_url_setting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let custom = temp.path().join("custom.properties");
        std::fs::write(&custom, "b=2\n").expect("write");
        let url = Url::from_file_path(&custom).expect("file url");

        let mut settings = ProcessSettings::new();
        settings.set(CONFIG_PROPERTIES, url.as_str());
        let env = FilesystemEnvironment::new(temp.path().join("elsewhere"));
        let text = env
            .read_properties(PropertiesKind::Config, &settings)
            .expect("read");
        assert_eq!(text.as_deref(), Some("b=2\n"));
    }

    #[test]
    fn non_file_scheme_is_malformed() {
        let mut settings = ProcessSettings::new();
        settings.set(SYSTEM_PROPERTIES, "http://example.com/system.properties");
        let env = FilesystemEnvironment::new("/nonexistent");
        let err = env
            .read_properties(PropertiesKind::System, &settings)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MalformedLocation { .. }));
    }

    #[test]
    fn resource_tree_reads_default_and_custom_locations() {
        let mut tree = ResourceTree::new();
        tree.insert("/conf/config.properties", "a=1\n");
        tree.insert("/settings/alt.properties", "b=2\n");
        let env = ResourceTreeEnvironment::new(tree);

        let settings = ProcessSettings::new();
        assert_eq!(
            env.read_properties(PropertiesKind::Config, &settings)
                .expect("read")
                .as_deref(),
            Some("a=1\n")
        );

        let mut custom = ProcessSettings::new();
        custom.set(CONFIG_PROPERTIES, "/settings/alt.properties");
        assert_eq!(
            env.read_properties(PropertiesKind::Config, &custom)
                .expect("read")
                .as_deref(),
            Some("b=2\n")
        );
    }

    #[test]
    fn resource_tree_custom_location_must_exist() {
        let env = ResourceTreeEnvironment::new(ResourceTree::new());
        let mut settings = ProcessSettings::new();
        settings.set(CONFIG_PROPERTIES, "/settings/missing.properties");
        let err = env
            .read_properties(PropertiesKind::Config, &settings)
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }
}
