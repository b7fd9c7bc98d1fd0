//! Selection and collapse state for one gallery view.

use crate::model::{ImageDescriptor, ImageGroup, PageSnapshot};
use std::collections::HashSet;

/// How much of a group is selected; drives the group button label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSelection {
    /// No member selected.
    None,
    /// Some but not all members selected.
    Partial {
        /// Selected members.
        selected: usize,
        /// Group size.
        total: usize,
    },
    /// Every member selected.
    All,
}

impl GroupSelection {
    /// Group button label.
    pub fn label(self) -> String {
        match self {
            Self::None => "select group".to_string(),
            Self::Partial { selected, total } => format!("{selected}/{total} selected"),
            Self::All => "group selected".to_string(),
        }
    }
}

/// What the global select-all control shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalToggle {
    /// No images at all; the control is disabled.
    Disabled,
    /// Pressing selects every image.
    SelectAll,
    /// Pressing clears the selection.
    DeselectAll,
}

impl GlobalToggle {
    /// Label of the global control.
    pub fn label(self) -> &'static str {
        match self {
            Self::Disabled => "no images",
            Self::SelectAll => "select all",
            Self::DeselectAll => "deselect all",
        }
    }
}

/// Counts shown next to the gallery actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionSummary {
    /// Selected images.
    pub selected: usize,
    /// Images in the snapshot.
    pub total: usize,
    /// Whether the archive action is enabled.
    pub archive_enabled: bool,
    /// State of the global toggle.
    pub toggle: GlobalToggle,
}

/// Owns the current snapshot plus the selected ids and collapsed group keys.
#[derive(Debug, Clone)]
pub struct SelectionController {
    snapshot: PageSnapshot,
    selected: HashSet<String>,
    collapsed: HashSet<String>,
}

impl SelectionController {
    /// Starts with nothing selected and nothing collapsed.
    pub fn new(snapshot: PageSnapshot) -> Self {
        Self {
            snapshot,
            selected: HashSet::new(),
            collapsed: HashSet::new(),
        }
    }

    /// Swaps in a fresh scan. The selection is cleared, collapsed groups are kept.
    pub fn replace_snapshot(&mut self, snapshot: PageSnapshot) {
        self.snapshot = snapshot;
        self.selected.clear();
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> &PageSnapshot {
        &self.snapshot
    }

    /// Number of selected images.
    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    /// Whether `id` is selected.
    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    /// Sets one image's state. Returns `true` when the state changed.
    ///
    /// Ids that are not part of the snapshot are ignored.
    pub fn select_image(&mut self, id: &str, selected: bool) -> bool {
        if self.snapshot.image(id).is_none() {
            return false;
        }
        if selected {
            self.selected.insert(id.to_string())
        } else {
            self.selected.remove(id)
        }
    }

    /// Applies `select_image` to every member of a group. Returns the number of changes.
    pub fn select_group(&mut self, dimension_key: &str, selected: bool) -> usize {
        let ids = match self.snapshot.group(dimension_key) {
            Some(group) => member_ids(group),
            None => return 0,
        };
        ids.iter()
            .filter(|id| self.select_image(id, selected))
            .count()
    }

    /// Group button press: selects all members only when none is selected,
    /// otherwise deselects all of them, partial selections included.
    pub fn toggle_group(&mut self, dimension_key: &str) -> usize {
        let should_select = match self.group_selection(dimension_key) {
            Some(GroupSelection::None) => true,
            Some(_) => false,
            None => return 0,
        };
        self.select_group(dimension_key, should_select)
    }

    /// Selects or clears every image.
    pub fn select_all(&mut self, selected: bool) {
        if selected {
            self.selected = self
                .snapshot
                .images()
                .iter()
                .map(|image| image.id.clone())
                .collect();
        } else {
            self.selected.clear();
        }
    }

    /// Global toggle: clears when everything is selected, otherwise selects everything.
    /// Does nothing when the snapshot has no images.
    pub fn toggle_all(&mut self) {
        let total = self.snapshot.images().len();
        if total == 0 {
            return;
        }
        let all_selected = self.selected.len() == total;
        self.select_all(!all_selected);
    }

    /// Selection state of one group, or `None` for an unknown key.
    pub fn group_selection(&self, dimension_key: &str) -> Option<GroupSelection> {
        let group = self.snapshot.group(dimension_key)?;
        let total = group.members.len();
        let selected = group
            .members
            .iter()
            .filter(|member| self.selected.contains(&member.id))
            .count();
        Some(match selected {
            0 => GroupSelection::None,
            n if n == total => GroupSelection::All,
            n => GroupSelection::Partial { selected: n, total },
        })
    }

    /// Counts and control states for the action bar.
    pub fn summary(&self) -> SelectionSummary {
        let total = self.snapshot.images().len();
        let selected = self.selected.len();
        let toggle = if total == 0 {
            GlobalToggle::Disabled
        } else if selected == total {
            GlobalToggle::DeselectAll
        } else {
            GlobalToggle::SelectAll
        };
        SelectionSummary {
            selected,
            total,
            archive_enabled: selected > 0,
            toggle,
        }
    }

    /// Selected images in document order.
    pub fn selected_descriptors(&self) -> Vec<&ImageDescriptor> {
        self.snapshot
            .images()
            .iter()
            .filter(|image| self.selected.contains(&image.id))
            .collect()
    }

    /// Flips a group between collapsed and expanded. Returns the new collapsed state.
    pub fn toggle_collapsed(&mut self, dimension_key: &str) -> bool {
        if self.collapsed.remove(dimension_key) {
            false
        } else {
            self.collapsed.insert(dimension_key.to_string());
            true
        }
    }

    /// Whether a group is collapsed.
    pub fn is_collapsed(&self, dimension_key: &str) -> bool {
        self.collapsed.contains(dimension_key)
    }
}

fn member_ids(group: &ImageGroup) -> Vec<String> {
    group.members.iter().map(|m| m.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageFormat;
    use pretty_assertions::assert_eq;

    fn snapshot() -> PageSnapshot {
        let dims = [(10, 10), (10, 10), (20, 20), (10, 10)];
        let images = dims
            .iter()
            .enumerate()
            .map(|(i, &(width, height))| ImageDescriptor {
                id: format!("img_{i}"),
                source_url: format!("https://cdn.test/{i}.png"),
                alt_text: String::new(),
                width,
                height,
                format: ImageFormat::Png,
            })
            .collect();
        PageSnapshot::new(images, "https://page.test".into(), "Page".into())
    }

    #[test]
    fn select_image_is_idempotent() {
        let mut controller = SelectionController::new(snapshot());
        assert!(controller.select_image("img_0", true));
        assert!(!controller.select_image("img_0", true));
        assert!(!controller.select_image("img_missing", true));
        assert_eq!(controller.selected_count(), 1);
    }

    #[test]
    fn partial_group_toggle_collapses_to_deselect() {
        let mut controller = SelectionController::new(snapshot());
        controller.select_image("img_1", true);
        assert_eq!(
            controller.group_selection("10x10"),
            Some(GroupSelection::Partial {
                selected: 1,
                total: 3
            })
        );

        controller.toggle_group("10x10");

        assert_eq!(controller.group_selection("10x10"), Some(GroupSelection::None));
        assert_eq!(controller.selected_count(), 0);
    }

    #[test]
    fn labels_follow_selection_state() {
        assert_eq!(
            GroupSelection::Partial {
                selected: 2,
                total: 5
            }
            .label(),
            "2/5 selected"
        );
        assert_eq!(GroupSelection::All.label(), "group selected");
        assert_eq!(GlobalToggle::Disabled.label(), "no images");
    }

    #[test]
    fn empty_group_toggle_selects_every_member() {
        let mut controller = SelectionController::new(snapshot());
        assert_eq!(controller.toggle_group("10x10"), 3);
        assert_eq!(controller.group_selection("10x10"), Some(GroupSelection::All));
        assert_eq!(controller.group_selection("20x20"), Some(GroupSelection::None));
    }

    #[test]
    fn toggle_all_on_empty_snapshot_is_noop() {
        let mut controller = SelectionController::new(PageSnapshot::empty(
            "https://page.test".into(),
            String::new(),
        ));
        controller.toggle_all();
        assert_eq!(controller.selected_count(), 0);
        assert_eq!(controller.summary().toggle, GlobalToggle::Disabled);
    }

    #[test]
    fn toggle_all_uses_full_selection_as_the_pivot() {
        let mut controller = SelectionController::new(snapshot());
        controller.select_image("img_2", true);
        controller.toggle_all();
        assert_eq!(controller.selected_count(), 4);
        assert_eq!(controller.summary().toggle, GlobalToggle::DeselectAll);

        controller.toggle_all();
        assert_eq!(controller.selected_count(), 0);
        assert!(!controller.summary().archive_enabled);
    }

    #[test]
    fn rescan_clears_selection_but_keeps_collapsed_groups() {
        let mut controller = SelectionController::new(snapshot());
        controller.select_all(true);
        assert!(controller.toggle_collapsed("20x20"));

        controller.replace_snapshot(snapshot());

        assert_eq!(controller.selected_count(), 0);
        assert!(controller.is_collapsed("20x20"));
        assert!(!controller.toggle_collapsed("20x20"));
    }

    #[test]
    fn selected_descriptors_follow_document_order() {
        let mut controller = SelectionController::new(snapshot());
        controller.select_image("img_3", true);
        controller.select_image("img_0", true);
        let ids: Vec<_> = controller
            .selected_descriptors()
            .iter()
            .map(|d| d.id.as_str())
            .collect();
        assert_eq!(ids, vec!["img_0", "img_3"]);
    }
}
