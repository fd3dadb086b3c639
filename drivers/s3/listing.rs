//! 目录模拟：把平铺的键列表折叠成一层目录视图

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::client::ObjectInfo;
use crate::storage::{Entry, Stat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    File,
    Dir,
}

#[derive(Debug)]
struct Slot {
    seq: u64,
    kind: Kind,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

/// Folds a flat key listing into the immediate children of one prefix / 列表聚合器
///
/// Keys directly under the prefix become files; deeper keys are grouped under
/// their first segment as a synthesized directory whose size is the sum and
/// whose mtime is the max of everything observed below it. Output keeps the
/// order in which each name was first seen. The aggregate only covers keys
/// pushed so far, so drain every listing page before calling `finish`.
#[derive(Debug)]
pub struct ListingAggregator {
    prefix: String,
    slots: HashMap<String, Slot>,
    next_seq: u64,
}

impl ListingAggregator {
    /// `prefix` is the full key prefix of the listed directory, with trailing `/` (or empty for the bucket root)
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            slots: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, obj: &ObjectInfo) {
        let relative = match obj.key.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest,
            None => return,
        };
        // 目录自身的占位对象
        if relative.is_empty() {
            return;
        }
        // 子目录占位对象 `name/` 视为没有后续分段的文件行，同名时按合并规则处理
        let relative = relative.strip_suffix('/').unwrap_or(relative);

        let (name, kind) = match relative.split_once('/') {
            None => (relative, Kind::File),
            Some((first, _)) => (first, Kind::Dir),
        };
        if name.is_empty() {
            return;
        }

        match self.slots.get_mut(name) {
            Some(slot) => {
                slot.size += obj.size;
                slot.modified = slot.modified.max(obj.last_modified);
                // 同名时目录优先
                if kind == Kind::Dir {
                    slot.kind = Kind::Dir;
                }
            }
            None => {
                self.slots.insert(
                    name.to_string(),
                    Slot {
                        seq: self.next_seq,
                        kind,
                        size: obj.size,
                        modified: obj.last_modified,
                    },
                );
                self.next_seq += 1;
            }
        }
    }

    pub fn extend<'a>(&mut self, objects: impl IntoIterator<Item = &'a ObjectInfo>) {
        for obj in objects {
            self.push(obj);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Entries in first-appearance order / 按首次出现顺序输出
    pub fn finish(self) -> Vec<Entry> {
        let mut slots: Vec<(String, Slot)> = self.slots.into_iter().collect();
        slots.sort_by_key(|(_, slot)| slot.seq);
        slots
            .into_iter()
            .map(|(name, slot)| {
                let stat = Stat { name, size: slot.size, modified: slot.modified };
                match slot.kind {
                    Kind::File => Entry::File(stat),
                    Kind::Dir => Entry::Dir(stat),
                }
            })
            .collect()
    }
}
