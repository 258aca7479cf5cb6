use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use studyalloc_store::GroupDirectory;
use studyalloc_store::GroupId;
use studyalloc_store::ProjectId;
use studyalloc_store::StoreError;

/// Group directory backed by a fixed map.
///
/// Projects without any registered group return an empty map.
#[derive(Default)]
pub struct StaticGroupDirectory {
    groups: BTreeMap<ProjectId, BTreeMap<GroupId, String>>,
    unavailable: AtomicBool,
}

impl StaticGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group display name.
    pub fn with_group(mut self, project: ProjectId, group: GroupId, name: impl Into<String>) -> Self {
        self.groups.entry(project).or_default().insert(group, name.into());
        self
    }

    /// Build from a `project -> group -> name` map.
    pub fn from_map(groups: BTreeMap<ProjectId, BTreeMap<GroupId, String>>) -> Self {
        Self {
            groups,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Make every lookup fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl GroupDirectory for StaticGroupDirectory {
    async fn group_names(&self, project: ProjectId) -> Result<BTreeMap<GroupId, String>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "group directory offline".into(),
            });
        }
        Ok(self.groups.get(&project).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_registered_groups() {
        let directory = StaticGroupDirectory::new()
            .with_group(ProjectId(1), GroupId(10), "01_stanford")
            .with_group(ProjectId(1), GroupId(11), "05_duke");

        let names = directory.group_names(ProjectId(1)).await.unwrap();
        assert_eq!(names.len(), 2);
        assert_eq!(names[&GroupId(11)], "05_duke");
        assert!(directory.group_names(ProjectId(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_fails() {
        let directory = StaticGroupDirectory::new();
        directory.set_unavailable(true);
        assert!(matches!(
            directory.group_names(ProjectId(1)).await,
            Err(StoreError::Unavailable { .. })
        ));
    }
}
