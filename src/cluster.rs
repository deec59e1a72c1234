mod crd;
mod loader;
mod settled;
mod token;
mod version;
mod watch;

pub use crd::*;
pub use loader::*;
pub use settled::*;
pub use token::*;
pub use version::*;
pub use watch::*;

use std::{convert::Infallible, fmt, str::FromStr};

pub const ALL_NAMESPACES: &str = "<all>";
pub const NOT_NAMESPACED: &str = "<not-namespaced>";

/// Which part of a cluster a load covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum NamespaceSelection {
    #[default]
    All,
    NotNamespaced,
    Named(String),
}

impl FromStr for NamespaceSelection {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            ALL_NAMESPACES | "" => Self::All,
            NOT_NAMESPACED => Self::NotNamespaced,
            ns => Self::Named(ns.to_string()),
        })
    }
}

impl fmt::Display for NamespaceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "{}", ALL_NAMESPACES),
            Self::NotNamespaced => write!(f, "{}", NOT_NAMESPACED),
            Self::Named(ns) => write!(f, "{}", ns),
        }
    }
}

impl NamespaceSelection {
    /// Whether handlers of the given scope take part in the load.
    pub fn includes_scope(&self, namespaced: bool) -> bool {
        match self {
            Self::All => true,
            Self::NotNamespaced => !namespaced,
            Self::Named(_) => namespaced,
        }
    }

    /// Namespaces a namespaced kind is listed in. `None` stands for the
    /// cluster-wide list.
    pub fn namespaces(&self, allowed: &[String]) -> Vec<Option<String>> {
        match self {
            Self::Named(ns) => vec![Some(ns.clone())],
            Self::NotNamespaced => vec![],
            Self::All if allowed.is_empty() => vec![None],
            Self::All => allowed.iter().cloned().map(Some).collect(),
        }
    }

    /// The namespace watches and client defaults are scoped to.
    pub fn as_namespace(&self) -> Option<&str> {
        match self {
            Self::Named(ns) => Some(ns),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("<all>", NamespaceSelection::All)]
    #[case("", NamespaceSelection::All)]
    #[case("<not-namespaced>", NamespaceSelection::NotNamespaced)]
    #[case("prod", NamespaceSelection::Named("prod".into()))]
    fn parses_selection(#[case] input: &str, #[case] expected: NamespaceSelection) {
        let parsed: NamespaceSelection = input.parse().unwrap();

        assert_eq!(parsed, expected);
    }

    #[test]
    fn all_without_access_entries_lists_cluster_wide() {
        assert_eq!(NamespaceSelection::All.namespaces(&[]), vec![None]);
        assert_eq!(
            NamespaceSelection::All.namespaces(&["a".into(), "b".into()]),
            vec![Some("a".to_string()), Some("b".to_string())]
        );
        assert!(NamespaceSelection::NotNamespaced.namespaces(&[]).is_empty());
    }
}
