//! Ordered task lists.

use futures::future::BoxFuture;
use packforge_common::PackageType;

use super::Pipeline;
use super::unit::Unit;
use super::units::{
    AppStream, BuildDeb, DebianChangelog, DebianControl, Desktop, ExtractDeb, PackDeb,
    ProjectConfigUnit,
};
use crate::errors::RunAbort;

type StepFn = for<'a> fn(&'a mut Pipeline) -> BoxFuture<'a, Result<(), RunAbort>>;

fn step<U: Unit>(cx: &mut Pipeline) -> BoxFuture<'_, Result<(), RunAbort>> {
    Box::pin(async move { cx.require::<U>().await.map(|_| ()) })
}

/// One entry of a task list.
#[derive(Clone, Copy)]
pub struct Task {
    name: &'static str,
    run: StepFn,
}

impl Task {
    pub fn of<U: Unit>() -> Self {
        Self {
            name: U::NAME,
            run: step::<U>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn call<'a>(&self, cx: &'a mut Pipeline) -> BoxFuture<'a, Result<(), RunAbort>> {
        (self.run)(cx)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Task").field(&self.name).finish()
    }
}

/// Units required in order by a run.
#[derive(Debug, Clone, Default)]
pub struct TaskList {
    tasks: Vec<Task>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then<U: Unit>(mut self) -> Self {
        self.tasks.push(Task::of::<U>());
        self
    }

    /// Default task list for a package type.
    pub fn for_package(package_type: PackageType) -> Self {
        let list = Self::new()
            .then::<ProjectConfigUnit>()
            .then::<DebianChangelog>()
            .then::<DebianControl>()
            .then::<BuildDeb>();
        if !package_type.is_inspected() {
            return list;
        }
        list.then::<ExtractDeb>()
            .then::<AppStream>()
            .then::<Desktop>()
            .then::<PackDeb>()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(Task::name).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_task_list() {
        assert_eq!(
            TaskList::for_package(PackageType::Library).names(),
            vec![
                "project-config",
                "debian-changelog",
                "debian-control",
                "build-deb"
            ]
        );
    }

    #[test]
    fn test_app_task_list() {
        let expected = vec![
            "project-config",
            "debian-changelog",
            "debian-control",
            "build-deb",
            "extract-deb",
            "appstream",
            "desktop",
            "pack-deb",
        ];
        assert_eq!(TaskList::for_package(PackageType::App).names(), expected);
        assert_eq!(TaskList::for_package(PackageType::SystemApp).names(), expected);
    }
}
