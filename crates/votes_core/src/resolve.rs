use crate::cache::{CacheLookup, ReconCache};
use crate::mandate::MandateIndex;
use crate::matcher;
use crate::normalize::normalize_name;
use anyhow::Result;
use time::Date;
use tracing::{error, info, warn};

// What the remote directory knows about a person.
#[derive(Debug, Clone)]
pub struct RemoteMep {
    pub remote_id: String,
    pub full_name: String,
}

// Seam to the external representative directory, so the pipeline runs
// against a stub in tests. Any Err is a soft miss to the caller.
pub trait DirectoryLookup {
    fn mep_by_name(&self, name: &str) -> Result<RemoteMep>;
    fn dossier_title(&self, reference: &str) -> Result<Option<String>>;
}

// The reconciliation pipeline: normalizer, local matcher, cache, remote
// directory, short-circuiting at the first answer. Never fails; every
// miss collapses to None.
pub struct Resolver<'a> {
    index: &'a MandateIndex,
    cache: &'a mut ReconCache,
    directory: &'a dyn DirectoryLookup,
}

impl<'a> Resolver<'a> {
    pub fn new(
        index: &'a MandateIndex,
        cache: &'a mut ReconCache,
        directory: &'a dyn DirectoryLookup,
    ) -> Self {
        Self { index, cache, directory }
    }

    // The group label never disambiguates; it only scopes the cache key and
    // the log lines.
    pub fn resolve(&mut self, raw_name: &str, date: Date, group: &str) -> Option<i64> {
        let name = normalize_name(raw_name);

        if let Some(representative) = matcher::find_local(self.index, &name, date) {
            return Some(representative);
        }

        match self.cache.lookup(&name, group) {
            CacheLookup::Hit(Some(remote_id)) => match self.index.representative_by_remote(&remote_id) {
                Some(representative) => Some(representative),
                None => {
                    warn!(%name, group, %remote_id, "cached remote id has no local representative");
                    None
                }
            },
            CacheLookup::Hit(None) => None,
            CacheLookup::Absent => self.resolve_remote(&name, group),
        }
    }

    fn resolve_remote(&mut self, name: &str, group: &str) -> Option<i64> {
        info!(name, group, "looking up representative in the remote directory");

        let mep = match self.directory.mep_by_name(name) {
            Ok(mep) => mep,
            Err(err) => {
                warn!(name, group, "directory lookup failed: {err:#}");
                self.cache.store(name, group, None);
                return None;
            }
        };

        match self.index.representative_by_remote(&mep.remote_id) {
            Some(representative) => {
                self.cache.store(name, group, Some(mep.remote_id));
                Some(representative)
            }
            None => {
                // The directory knows the person but we do not: a desync
                // between the directory and the local representative import.
                error!(
                    name,
                    group,
                    remote_id = %mep.remote_id,
                    remote_full_name = %mep.full_name,
                    "directory returned an id with no local representative"
                );
                self.cache.store(name, group, None);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_mandate, insert_representative, open_in_memory};
    use anyhow::anyhow;
    use std::cell::RefCell;
    use time::macros::date;

    const VOTE_DAY: Date = date!(2011 - 02 - 03);

    // Scripted directory double that counts how often it is asked.
    struct StubDirectory {
        answer: Result<RemoteMep, String>,
        calls: RefCell<usize>,
    }

    impl StubDirectory {
        fn returning(remote_id: &str, full_name: &str) -> Self {
            Self {
                answer: Ok(RemoteMep {
                    remote_id: remote_id.into(),
                    full_name: full_name.into(),
                }),
                calls: RefCell::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                answer: Err("no such mep".into()),
                calls: RefCell::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.borrow()
        }
    }

    impl DirectoryLookup for StubDirectory {
        fn mep_by_name(&self, _name: &str) -> Result<RemoteMep> {
            *self.calls.borrow_mut() += 1;
            self.answer.clone().map_err(|message| anyhow!(message))
        }

        fn dossier_title(&self, _reference: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn seeded_index() -> (rusqlite::Connection, i64) {
        let conn = open_in_memory().unwrap();
        let rep = insert_representative(&conn, Some("4242"), "Jan VRIES", "VRIES").unwrap();
        insert_mandate(&conn, rep, "country", "NL", date!(2009 - 07 - 14), date!(2014 - 06 - 30))
            .unwrap();
        (conn, rep)
    }

    #[test]
    fn local_match_short_circuits_the_remote() {
        let (conn, rep) = seeded_index();
        let index = MandateIndex::load(&conn).unwrap();
        let mut cache = ReconCache::default();
        let directory = StubDirectory::returning("9", "Never Asked");

        let mut resolver = Resolver::new(&index, &mut cache, &directory);
        // Independent of the group label.
        assert_eq!(resolver.resolve("VRIES", VOTE_DAY, "ALDE"), Some(rep));
        assert_eq!(resolver.resolve("VRIES", VOTE_DAY, "PPE"), Some(rep));
        assert_eq!(directory.calls(), 0);
    }

    #[test]
    fn cache_hit_skips_the_remote() {
        let (conn, rep) = seeded_index();
        let index = MandateIndex::load(&conn).unwrap();
        let mut cache = ReconCache::default();
        cache.store("Nobody Local", "ALDE", Some("4242".into()));
        let directory = StubDirectory::returning("9", "Never Asked");

        let mut resolver = Resolver::new(&index, &mut cache, &directory);
        assert_eq!(resolver.resolve("Nobody Local", VOTE_DAY, "ALDE"), Some(rep));
        assert_eq!(directory.calls(), 0);
    }

    #[test]
    fn negative_cache_entry_is_final() {
        let (conn, _) = seeded_index();
        let index = MandateIndex::load(&conn).unwrap();
        let mut cache = ReconCache::default();
        cache.store("Zzyzx", "ALDE", None);
        let directory = StubDirectory::returning("4242", "Would Resolve");

        let mut resolver = Resolver::new(&index, &mut cache, &directory);
        assert_eq!(resolver.resolve("Zzyzx", VOTE_DAY, "ALDE"), None);
        assert_eq!(directory.calls(), 0);
    }

    #[test]
    fn remote_success_is_cached_and_not_retried() {
        let (conn, rep) = seeded_index();
        let index = MandateIndex::load(&conn).unwrap();
        let mut cache = ReconCache::default();
        let directory = StubDirectory::returning("4242", "Jan VRIES");

        let mut resolver = Resolver::new(&index, &mut cache, &directory);
        assert_eq!(resolver.resolve("Vries, J.", VOTE_DAY, "ALDE"), Some(rep));
        assert_eq!(resolver.resolve("Vries, J.", VOTE_DAY, "ALDE"), Some(rep));
        assert_eq!(directory.calls(), 1);
        assert_eq!(
            cache.lookup("Vries, J.", "ALDE"),
            crate::cache::CacheLookup::Hit(Some("4242".into()))
        );
    }

    #[test]
    fn remote_failure_caches_unresolvable() {
        let (conn, _) = seeded_index();
        let index = MandateIndex::load(&conn).unwrap();
        let mut cache = ReconCache::default();
        let directory = StubDirectory::failing();

        let mut resolver = Resolver::new(&index, &mut cache, &directory);
        assert_eq!(resolver.resolve("Zzyzx", VOTE_DAY, "ALDE"), None);
        assert_eq!(resolver.resolve("Zzyzx", VOTE_DAY, "ALDE"), None);
        assert_eq!(directory.calls(), 1);
        assert_eq!(
            cache.lookup("Zzyzx", "ALDE"),
            crate::cache::CacheLookup::Hit(None)
        );
    }

    #[test]
    fn unknown_remote_id_is_a_desync_not_a_match() {
        let (conn, _) = seeded_index();
        let index = MandateIndex::load(&conn).unwrap();
        let mut cache = ReconCache::default();
        let directory = StubDirectory::returning("31337", "Unknown Here");

        let mut resolver = Resolver::new(&index, &mut cache, &directory);
        assert_eq!(resolver.resolve("Ghost", VOTE_DAY, "ALDE"), None);
        assert_eq!(
            cache.lookup("Ghost", "ALDE"),
            crate::cache::CacheLookup::Hit(None)
        );
    }

    #[test]
    fn normalization_applies_before_every_stage() {
        let (conn, rep) = seeded_index();
        // Stored last name uses the SS spelling the feed's ß maps onto.
        let gross = insert_representative(&conn, None, "Hans GROSS", "GROSS").unwrap();
        insert_mandate(&conn, gross, "country", "DE", date!(2009 - 07 - 14), date!(2014 - 06 - 30))
            .unwrap();
        let index = MandateIndex::load(&conn).unwrap();
        let mut cache = ReconCache::default();
        let directory = StubDirectory::failing();

        let mut resolver = Resolver::new(&index, &mut cache, &directory);
        assert_eq!(resolver.resolve("Groß", VOTE_DAY, "PPE"), Some(gross));
        assert_eq!(resolver.resolve("(The Earl of) Vries", VOTE_DAY, "ECR"), Some(rep));
        assert_eq!(directory.calls(), 0);
    }
}
