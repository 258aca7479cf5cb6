//! Group to site code mapping.

use std::collections::BTreeMap;

use snafu::ResultExt;
use studyalloc_store::GroupDirectory;
use studyalloc_store::GroupId;
use studyalloc_store::ProjectId;
use tracing::debug;

use crate::error::AllocationError;
use crate::error::ReadSnafu;
use crate::verified::parse_site_code;

/// Read-only map of group id to numeric site code, derived from group names
/// such as `05_duke`. Groups whose names carry no code are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteCodes {
    codes: BTreeMap<GroupId, u32>,
}

impl SiteCodes {
    pub fn from_group_names(names: &BTreeMap<GroupId, String>) -> Self {
        let codes = names
            .iter()
            .filter_map(|(group, name)| parse_site_code(name).map(|code| (*group, code)))
            .collect();
        Self { codes }
    }

    /// Fetch the project's group names and derive the map.
    pub async fn load<D: GroupDirectory + ?Sized>(directory: &D, project: ProjectId) -> Result<Self, AllocationError> {
        let names = directory.group_names(project).await.context(ReadSnafu {
            what: "group names".to_string(),
        })?;
        let codes = Self::from_group_names(&names);
        debug!(%project, groups = names.len(), coded = codes.len(), "loaded site codes");
        Ok(codes)
    }

    pub fn resolve(&self, group: GroupId) -> Option<u32> {
        self.codes.get(&group).copied()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}
