use serde::{Deserialize, Serialize};

/// One entry of the project manifest.
///
/// `outdated` and `latest_version` are filled in by
/// [`merge_outdated`](crate::npm::merge_outdated) once the outdated check
/// has finished; `outdated == true` always comes with a latest version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyInfo {
    pub name: String,
    pub version: String,
    pub dev_dependency: bool,
    pub outdated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
}

impl DependencyInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>, dev_dependency: bool) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dev_dependency,
            outdated: false,
            latest_version: None,
        }
    }

    pub fn mark_outdated(&mut self, latest: impl Into<String>) {
        self.outdated = true;
        self.latest_version = Some(latest.into());
    }
}
