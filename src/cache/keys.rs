//! Cache key construction.
//!
//! Keys are namespaced `{prefix}:{resource}:...` so every read shape of a
//! resource can be dropped with one pattern.

use uuid::Uuid;

use crate::domain::types::ResourceKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    prefix: String,
    kind: ResourceKind,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            prefix: prefix.into(),
            kind,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn base(&self) -> String {
        format!("{}:{}", self.prefix, self.kind)
    }

    /// `{prefix}:{resource}:{id}`
    pub fn point(&self, id: Uuid) -> String {
        format!("{}:{id}", self.base())
    }

    /// `{prefix}:{resource}:{id}:with:{rel,rel}`
    pub fn point_populated(&self, id: Uuid, relations: &[&str]) -> String {
        format!("{}:{id}:with:{}", self.base(), relations.join(","))
    }

    /// Matches the plain and every populated point key of one record.
    pub fn point_pattern(&self, id: Uuid) -> String {
        format!("{}:{id}*", self.base())
    }

    /// `{prefix}:{resource}:list:{fragment}`
    pub fn list(&self, fragment: &str) -> String {
        format!("{}:list:{fragment}", self.base())
    }

    pub fn list_pattern(&self) -> String {
        format!("{}:list:*", self.base())
    }

    /// `{prefix}:{resource}:stats:{name}`
    pub fn stats(&self, name: &str) -> String {
        format!("{}:stats:{name}", self.base())
    }

    pub fn stats_pattern(&self) -> String {
        format!("{}:stats:*", self.base())
    }
}

/// Every key the layer owns under a prefix.
pub fn namespace_pattern(prefix: &str) -> String {
    format!("{prefix}:*")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::glob_match;

    #[test]
    fn keys_are_namespaced() {
        let keys = CacheKeys::new("wayfarer", ResourceKind::Tour);
        let id = Uuid::nil();
        assert_eq!(
            keys.point(id),
            "wayfarer:tour:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(keys.stats("summary"), "wayfarer:tour:stats:summary");
        assert!(keys.list("filter=&page=1").starts_with("wayfarer:tour:list:"));
    }

    #[test]
    fn patterns_cover_their_shapes_only() {
        let keys = CacheKeys::new("wayfarer", ResourceKind::Tour);
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();

        let point_pattern = keys.point_pattern(id);
        assert!(glob_match(&point_pattern, &keys.point(id)));
        assert!(glob_match(
            &point_pattern,
            &keys.point_populated(id, &["reviews", "guides"])
        ));
        assert!(!glob_match(&point_pattern, &keys.point(other)));

        assert!(glob_match(&keys.list_pattern(), &keys.list("page=2")));
        assert!(!glob_match(&keys.list_pattern(), &keys.stats("summary")));
        assert!(glob_match(&keys.stats_pattern(), &keys.stats("plan:2021")));

        let reviews = CacheKeys::new("wayfarer", ResourceKind::Review);
        assert!(!glob_match(&keys.list_pattern(), &reviews.list("page=1")));
        assert!(glob_match(&namespace_pattern("wayfarer"), &reviews.list("x")));
    }
}
