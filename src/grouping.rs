//! Partitions descriptors into dimension-keyed groups.

use crate::model::{ImageDescriptor, ImageGroup};
use std::collections::HashMap;

/// Buckets descriptors by `WxH` and orders buckets by descending size.
///
/// Buckets of equal size keep the order in which their first member appeared.
/// Images that merely share dimensions land in the same bucket.
pub fn group(descriptors: &[ImageDescriptor]) -> Vec<ImageGroup> {
    let mut groups: Vec<ImageGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for descriptor in descriptors {
        let key = descriptor.dimension_key();
        match index.get(&key) {
            Some(&slot) => groups[slot].members.push(descriptor.clone()),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(ImageGroup {
                    dimension_key: key,
                    width: descriptor.width,
                    height: descriptor.height,
                    members: vec![descriptor.clone()],
                });
            }
        }
    }

    // `sort_by` is stable, which keeps first-seen order on ties.
    groups.sort_by(|a, b| b.members.len().cmp(&a.members.len()));
    groups
}
