//! Filtering and ranking packages of a catalog snapshot.

use std::cmp::Ordering;

use tracing::trace;

use crate::error::PkgQueryError;
use crate::types::{CatalogPackage, PkgQueryArgs};
use crate::versions::{VersionKind, VersionRange};

impl PkgQueryArgs {
    /// Reject contradicting filters.
    pub fn check(&self) -> Result<(), PkgQueryError> {
        if self.name.is_some()
            && (self.pname.is_some() || self.version.is_some() || self.semver.is_some())
        {
            return Err(PkgQueryError::NameWithPnameOrVersion);
        }
        if self.version.is_some() && self.semver.is_some() {
            return Err(PkgQueryError::VersionWithSemver);
        }
        Ok(())
    }
}

/// How well a package matched a name query, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchRank {
    ExactPname,
    ExactAttrName,
    PartialPname,
    PartialAttrName,
    PartialDescription,
}

/// A validated [PkgQueryArgs] ready to run against packages.
#[derive(Debug, Clone)]
pub struct PkgQuery {
    args: PkgQueryArgs,
    range: Option<VersionRange>,
}

struct Candidate {
    match_rank: Option<MatchRank>,
    subtree_rank: usize,
    system_rank: usize,
    version: VersionKind,
    package: CatalogPackage,
}

impl PkgQuery {
    pub fn new(args: PkgQueryArgs) -> Result<Self, PkgQueryError> {
        args.check()?;
        let range = args.semver.as_deref().map(VersionRange::parse).transpose()?;
        Ok(Self { args, range })
    }

    pub fn args(&self) -> &PkgQueryArgs {
        &self.args
    }

    /// Filter `packages` and return the matches in ranked order.
    ///
    /// The order only depends on the packages themselves,
    /// never on the order they are passed in.
    pub fn run<'a>(
        &self,
        packages: impl IntoIterator<Item = &'a CatalogPackage>,
    ) -> std::vec::IntoIter<CatalogPackage> {
        let mut candidates = packages
            .into_iter()
            .filter_map(|package| self.candidate(package))
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| self.compare(a, b));
        trace!(n_results = candidates.len(), "ranked query results");
        candidates
            .into_iter()
            .map(|candidate| candidate.package)
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Whether `package` satisfies every filter of the query
    pub fn matches(&self, package: &CatalogPackage) -> bool {
        self.candidate(package).is_some()
    }

    fn candidate(&self, package: &CatalogPackage) -> Option<Candidate> {
        let args = &self.args;

        if let Some(name) = &args.name
            && &package.name != name
        {
            return None;
        }
        if let Some(pname) = &args.pname
            && &package.pname != pname
        {
            return None;
        }
        if let Some(attr_path) = &args.attr_path
            && &package.attr_path != attr_path
        {
            return None;
        }
        if let Some(version) = &args.version
            && &package.version != version
        {
            return None;
        }
        if let Some(range) = &self.range
            && !range.matches(package.semver.as_deref().unwrap_or(&package.version))
        {
            return None;
        }
        if package.broken && !args.allow_broken {
            return None;
        }
        if package.unfree && !args.allow_unfree {
            return None;
        }
        if !args.allowed_licenses.is_empty() {
            match &package.license {
                Some(license) if args.allowed_licenses.contains(license) => {},
                _ => return None,
            }
        }

        let system_rank = rank_in(&args.systems, &package.system)?;
        let subtree_rank = rank_in(&args.subtrees, &package.subtree)?;

        let attr_name = package.attr_name();
        if let Some(name) = &args.pname_or_attr_name
            && &package.pname != name
            && &attr_name != name
        {
            return None;
        }

        let match_rank = match (&args.partial_match, &args.pname_or_attr_name) {
            (Some(partial), _) => Some(partial_match_rank(package, &attr_name, partial)?),
            (None, Some(name)) if &package.pname == name => Some(MatchRank::ExactPname),
            (None, Some(_)) => Some(MatchRank::ExactAttrName),
            (None, None) => None,
        };

        let version = match &package.semver {
            Some(semver) => VersionKind::of(semver),
            None => VersionKind::of(&package.version),
        };

        Some(Candidate {
            match_rank,
            subtree_rank,
            system_rank,
            version,
            package: package.clone(),
        })
    }

    fn compare(&self, a: &Candidate, b: &Candidate) -> Ordering {
        a.match_rank
            .cmp(&b.match_rank)
            .then(b.package.rev_count.cmp(&a.package.rev_count))
            .then(b.package.scrape_date.cmp(&a.package.scrape_date))
            .then(a.subtree_rank.cmp(&b.subtree_rank))
            .then(a.system_rank.cmp(&b.system_rank))
            .then_with(|| {
                a.version
                    .cmp_newest_first(&b.version, self.args.prefer_pre_releases)
            })
            .then(a.package.broken.cmp(&b.package.broken))
            .then(a.package.unfree.cmp(&b.package.unfree))
            .then_with(|| a.package.attr_path.cmp(&b.package.attr_path))
            .then_with(|| a.package.subtree.cmp(&b.package.subtree))
            .then_with(|| a.package.system.cmp(&b.package.system))
    }
}

/// Position of `value` in `preferences`, `Some(0)` if there are no preferences
/// and `None` if `value` is not allowed.
fn rank_in<T: PartialEq>(preferences: &[T], value: &T) -> Option<usize> {
    if preferences.is_empty() {
        return Some(0);
    }
    preferences.iter().position(|p| p == value)
}

fn partial_match_rank(
    package: &CatalogPackage,
    attr_name: &str,
    partial: &str,
) -> Option<MatchRank> {
    if package.pname == partial {
        Some(MatchRank::ExactPname)
    } else if attr_name == partial {
        Some(MatchRank::ExactAttrName)
    } else if package.pname.contains(partial) {
        Some(MatchRank::PartialPname)
    } else if attr_name.contains(partial) {
        Some(MatchRank::PartialAttrName)
    } else if package
        .description
        .as_deref()
        .is_some_and(|description| description.contains(partial))
    {
        Some(MatchRank::PartialDescription)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::test_helpers::package;
    use crate::types::Subtree;

    fn attr_paths(query: &PkgQuery, packages: &[CatalogPackage]) -> Vec<String> {
        query.run(packages).map(|p| p.attr_path).collect()
    }

    #[test]
    fn check_rejects_name_with_pname() {
        let args = PkgQueryArgs {
            name: Some("hello-2.12.1".into()),
            pname: Some("hello".into()),
            ..Default::default()
        };
        assert!(matches!(
            args.check(),
            Err(PkgQueryError::NameWithPnameOrVersion)
        ));
    }

    #[test]
    fn check_rejects_version_with_semver() {
        let args = PkgQueryArgs {
            version: Some("1.0.0".into()),
            semver: Some("^1".into()),
            ..Default::default()
        };
        assert!(matches!(args.check(), Err(PkgQueryError::VersionWithSemver)));
    }

    #[test]
    fn invalid_semver_is_rejected() {
        let args = PkgQueryArgs {
            semver: Some(">=foo".into()),
            ..Default::default()
        };
        assert!(matches!(
            PkgQuery::new(args),
            Err(PkgQueryError::InvalidSemver(_))
        ));
    }

    #[test]
    fn exact_pname_ranks_before_partial() {
        let packages = vec![
            package("hello-world", "hello-world", "1.0.0"),
            package("hello", "hello", "2.12.1"),
        ];
        let query = PkgQuery::new(PkgQueryArgs {
            partial_match: Some("hello".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(attr_paths(&query, &packages), vec!["hello", "hello-world"]);
    }

    #[test]
    fn partial_match_ranks_description_last() {
        let mut described = package("greeter", "greeter", "1.0.0");
        described.description = Some("says hello".into());
        let packages = vec![
            described,
            package("my-hello", "my-hello", "1.0.0"),
            package("hello-tool", "tool", "1.0.0"),
            package("unrelated", "unrelated", "1.0.0"),
        ];
        let query = PkgQuery::new(PkgQueryArgs {
            partial_match: Some("hello".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(attr_paths(&query, &packages), vec![
            "my-hello",
            "hello-tool",
            "greeter"
        ]);
    }

    #[test]
    fn partial_match_is_case_sensitive() {
        let packages = vec![package("Hello", "Hello", "1.0.0")];
        let query = PkgQuery::new(PkgQueryArgs {
            partial_match: Some("hello".into()),
            ..Default::default()
        })
        .unwrap();
        assert!(attr_paths(&query, &packages).is_empty());
    }

    #[test]
    fn broken_and_unfree_are_excluded_unless_allowed() {
        let mut broken = package("broken", "broken", "1.0.0");
        broken.broken = true;
        let mut unfree = package("unfree", "unfree", "1.0.0");
        unfree.unfree = true;
        let packages = vec![broken, unfree, package("fine", "fine", "1.0.0")];

        let strict = PkgQuery::new(PkgQueryArgs {
            allow_unfree: false,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(attr_paths(&strict, &packages), vec!["fine"]);

        let lenient = PkgQuery::new(PkgQueryArgs {
            allow_broken: true,
            allow_unfree: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(attr_paths(&lenient, &packages), vec![
            "fine", "unfree", "broken"
        ]);
    }

    #[test]
    fn licenses_restrict_results() {
        let mut mit = package("mit", "mit", "1.0.0");
        mit.license = Some("MIT".into());
        let mut gpl = package("gpl", "gpl", "1.0.0");
        gpl.license = Some("GPL-3.0".into());
        let packages = vec![mit, gpl, package("none", "none", "1.0.0")];
        let query = PkgQuery::new(PkgQueryArgs {
            allowed_licenses: ["MIT".to_string()].into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(attr_paths(&query, &packages), vec!["mit"]);
    }

    #[test]
    fn semver_filters_and_ranks_newest_first() {
        let packages = vec![
            package("hello_2_12", "hello", "2.12.1"),
            package("hello_2_99", "hello", "2.99.0"),
            package("hello_3", "hello", "3.0.0"),
            package("hello_1", "hello", "1.9.9"),
            package("hello_date", "hello", "2023-01-01"),
        ];
        let query = PkgQuery::new(PkgQueryArgs {
            pname: Some("hello".into()),
            semver: Some("^2.12".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(attr_paths(&query, &packages), vec![
            "hello_2_99",
            "hello_2_12"
        ]);
    }

    #[test]
    fn pre_releases_rank_after_releases_by_default() {
        let packages = vec![
            package("next", "node", "21.0.0-rc.1"),
            package("stable", "node", "20.1.0"),
        ];
        let query = PkgQuery::new(PkgQueryArgs::default()).unwrap();
        assert_eq!(attr_paths(&query, &packages), vec!["stable", "next"]);

        let query = PkgQuery::new(PkgQueryArgs {
            prefer_pre_releases: true,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(attr_paths(&query, &packages), vec!["next", "stable"]);
    }

    #[test]
    fn pname_or_attr_name_prefers_pname() {
        let packages = vec![
            package("python3Packages.black", "python3.11-black", "23.1.0"),
            package("black", "black", "23.1.0"),
            package("other", "other", "1.0.0"),
        ];
        let query = PkgQuery::new(PkgQueryArgs {
            pname_or_attr_name: Some("black".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(attr_paths(&query, &packages), vec![
            "black",
            "python3Packages.black"
        ]);
    }

    #[test]
    fn subtrees_and_systems_filter_and_rank() {
        let mut flake_pkg = package("hello", "hello", "1.0.0");
        flake_pkg.subtree = Subtree::Packages;
        let mut darwin = package("hello", "hello", "1.0.0");
        darwin.system = "aarch64-darwin".into();
        let packages = vec![package("hello", "hello", "1.0.0"), flake_pkg, darwin];

        let query = PkgQuery::new(PkgQueryArgs {
            subtrees: vec![Subtree::Packages, Subtree::LegacyPackages],
            systems: vec!["x86_64-linux".into()],
            ..Default::default()
        })
        .unwrap();
        let results = query.run(&packages).collect::<Vec<_>>();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].subtree, Subtree::Packages);
        assert_eq!(results[1].subtree, Subtree::LegacyPackages);
    }

    #[test]
    fn newer_revisions_rank_first() {
        let mut old = package("hello", "hello", "1.0.0");
        old.rev_count = 10;
        let mut new = package("hello", "hello", "1.0.0");
        new.rev_count = 20;
        new.rev = "new".into();
        let query = PkgQuery::new(PkgQueryArgs::default()).unwrap();
        let results = query.run(&[old, new]).collect::<Vec<_>>();
        assert_eq!(results[0].rev, "new");
    }

    #[test]
    fn revision_outranks_subtree_preference() {
        let mut preferred = package("hello", "hello", "1.0.0");
        preferred.subtree = Subtree::Packages;
        let mut newer = package("hello", "hello", "1.0.0");
        newer.rev_count = 20;
        newer.rev = "new".into();

        let query = PkgQuery::new(PkgQueryArgs {
            subtrees: vec![Subtree::Packages, Subtree::LegacyPackages],
            ..Default::default()
        })
        .unwrap();
        let results = query.run(&[preferred, newer]).collect::<Vec<_>>();
        assert_eq!(results[0].rev, "new");
        assert_eq!(results[1].subtree, Subtree::Packages);
    }

    proptest! {
        #[test]
        fn order_does_not_depend_on_input_order(seed in any::<u64>()) {
            let mut packages = vec![
                package("a", "hello", "1.0.0"),
                package("b", "hello", "1.0.0"),
                package("hello", "hello", "2.0.0"),
                package("hello-world", "hello-world", "0.1.0"),
                package("c", "hellish", "2023-01-01"),
            ];
            let query = PkgQuery::new(PkgQueryArgs {
                partial_match: Some("hel".into()),
                ..Default::default()
            }).unwrap();
            let expected = attr_paths(&query, &packages);

            // deterministic shuffle
            let len = packages.len();
            let mut state = seed;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                packages.swap(i, (state % (i as u64 + 1)) as usize);
            }
            prop_assert_eq!(attr_paths(&query, &packages), expected);
        }
    }
}
