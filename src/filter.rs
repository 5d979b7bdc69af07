use std::collections::HashSet;

/// Repositories whose commits never enter the learning log.
#[derive(Debug, Clone, Default)]
pub struct RepositoryFilter {
    excluded: HashSet<String>,
}

impl RepositoryFilter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_excluded(&self, repository: &str) -> bool {
        self.excluded.contains(repository)
    }

    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }
}
