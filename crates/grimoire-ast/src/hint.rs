use std::fmt;

/// A generic optimizer hint rendered as a SQL comment after the command verb:
/// `SELECT /*+ SET_VAR(optimizer_switch = 'index_merge=off') */ ...`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentHint {
    text: String,
}

impl CommentHint {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    #[must_use]
    pub fn to_sql_string(&self) -> String {
        format!("/*+ {} */", self.text)
    }
}

/// MySQL index-hint kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexHintKind {
    Use,
    Force,
    Ignore,
}

impl fmt::Display for IndexHintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Use => "USE",
            Self::Force => "FORCE",
            Self::Ignore => "IGNORE",
        })
    }
}

/// Optional `FOR ...` scope of a MySQL index hint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IndexHintScope {
    #[default]
    None,
    Join,
    OrderBy,
    GroupBy,
}

impl IndexHintScope {
    #[must_use]
    const fn as_sql(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Join => " FOR JOIN",
            Self::OrderBy => " FOR ORDER BY",
            Self::GroupBy => " FOR GROUP BY",
        }
    }
}

/// A MySQL index hint: `USE/FORCE/IGNORE INDEX [FOR scope] (names)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexHint {
    pub kind: IndexHintKind,
    pub scope: IndexHintScope,
    pub names: Vec<String>,
}

impl IndexHint {
    #[must_use]
    pub fn new(kind: IndexHintKind, names: Vec<String>) -> Self {
        Self {
            kind,
            scope: IndexHintScope::None,
            names,
        }
    }

    #[must_use]
    pub fn for_scope(mut self, scope: IndexHintScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn to_sql_string(&self) -> String {
        format!(
            "{} INDEX{} ({})",
            self.kind,
            self.scope.as_sql(),
            self.names.join(", ")
        )
    }
}

/// Any hint mountable on a query. Structural equality is what the builder
/// uses to de-duplicate repeated mounts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Hint {
    Comment(CommentHint),
    Index(IndexHint),
}

impl Hint {
    #[must_use]
    pub fn comment(text: impl Into<String>) -> Self {
        Self::Comment(CommentHint::new(text))
    }

    #[must_use]
    pub fn to_sql_string(&self) -> String {
        match self {
            Self::Comment(h) => h.to_sql_string(),
            Self::Index(h) => h.to_sql_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_hint() {
        assert_eq!(
            Hint::comment("MAX_EXECUTION_TIME(1000)").to_sql_string(),
            "/*+ MAX_EXECUTION_TIME(1000) */"
        );
    }

    #[test]
    fn test_index_hint_forms() {
        let hint = IndexHint::new(IndexHintKind::Use, vec!["idx_title".to_owned()]);
        assert_eq!(hint.to_sql_string(), "USE INDEX (idx_title)");

        let hint = IndexHint::new(
            IndexHintKind::Force,
            vec!["idx_a".to_owned(), "idx_b".to_owned()],
        )
        .for_scope(IndexHintScope::OrderBy);
        assert_eq!(hint.to_sql_string(), "FORCE INDEX FOR ORDER BY (idx_a, idx_b)");
    }

    #[test]
    fn test_structural_equality() {
        let a = Hint::Index(IndexHint::new(IndexHintKind::Use, vec!["i".to_owned()]));
        let b = Hint::Index(IndexHint::new(IndexHintKind::Use, vec!["i".to_owned()]));
        let c = Hint::Index(IndexHint::new(IndexHintKind::Force, vec!["i".to_owned()]));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
