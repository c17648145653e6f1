/// Operation counts for one sync cycle (or part of one).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub bytes_copied: u64,
    pub files_copied: usize,
    pub files_moved: usize,
    pub files_unchanged: usize,
    pub attributes_updated: usize,
    pub directories_created: usize,
    pub directories_reused: usize,
    pub conflicts_resolved: usize,
    /// Conflicts where the occupant could not be moved and the incoming item took an alternate name
    pub conflicts_unresolved: usize,
    pub files_removed: usize,
    pub directories_removed: usize,
    pub entries_skipped: usize,
    pub errors: usize,
}

impl Summary {
    /// Whether the destination was mutated (attribute updates aside).
    #[must_use]
    pub fn changed_anything(&self) -> bool {
        self.files_copied > 0
            || self.files_moved > 0
            || self.directories_created > 0
            || self.conflicts_resolved > 0
            || self.conflicts_unresolved > 0
            || self.files_removed > 0
            || self.directories_removed > 0
    }
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_copied: self.bytes_copied + other.bytes_copied,
            files_copied: self.files_copied + other.files_copied,
            files_moved: self.files_moved + other.files_moved,
            files_unchanged: self.files_unchanged + other.files_unchanged,
            attributes_updated: self.attributes_updated + other.attributes_updated,
            directories_created: self.directories_created + other.directories_created,
            directories_reused: self.directories_reused + other.directories_reused,
            conflicts_resolved: self.conflicts_resolved + other.conflicts_resolved,
            conflicts_unresolved: self.conflicts_unresolved + other.conflicts_unresolved,
            files_removed: self.files_removed + other.files_removed,
            directories_removed: self.directories_removed + other.directories_removed,
            entries_skipped: self.entries_skipped + other.entries_skipped,
            errors: self.errors + other.errors,
        }
    }
}

impl std::ops::AddAssign for Summary {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes copied: {}\n\
            files copied: {}\n\
            files moved: {}\n\
            files unchanged: {}\n\
            attributes updated: {}\n\
            directories created: {}\n\
            directories reused: {}\n\
            conflicts resolved: {}\n\
            conflicts unresolved: {}\n\
            files removed: {}\n\
            directories removed: {}\n\
            entries skipped: {}\n\
            errors: {}",
            bytesize::ByteSize(self.bytes_copied),
            self.files_copied,
            self.files_moved,
            self.files_unchanged,
            self.attributes_updated,
            self.directories_created,
            self.directories_reused,
            self.conflicts_resolved,
            self.conflicts_unresolved,
            self.files_removed,
            self.directories_removed,
            self.entries_skipped,
            self.errors,
        )
    }
}
