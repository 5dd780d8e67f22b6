// src/component.rs

use crate::entry::{package_dir, EntryPoint};
use crate::model::{Component, IntervalMap};
use std::collections::BTreeSet;

/// Groups track IDs by the entry points whose import graph reaches the
/// files that own them. Entry points without reachable IDs yield an empty
/// component; components are numbered from 1 in entry-name order.
pub fn map_components(intervals: &IntervalMap, entries: &[EntryPoint]) -> Vec<Component> {
    let mut entries: Vec<&EntryPoint> = entries.iter().collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    entries
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| {
            let ids: BTreeSet<u32> = intervals
                .iter()
                .filter(|(path, _)| {
                    let dir = package_dir(path);
                    dir == entry.dir || entry.packages.contains(&dir)
                })
                .flat_map(|(_, interval)| interval.ids())
                .collect();
            Component {
                id: idx as u32 + 1,
                name: entry.name.clone(),
                track_ids: ids.into_iter().collect(),
            }
        })
        .collect()
}
