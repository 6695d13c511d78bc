use crate::cache::ReconCache;
use crate::db::{self, DATETIME_FORMAT};
use crate::mandate::MandateIndex;
use crate::resolve::{DirectoryLookup, Resolver};
use crate::schema::{Position, ProposalRecord};
use anyhow::Result;
use regex::Regex;
use rusqlite::Connection;
use serde_json::Value;
use time::{Date, PrimitiveDateTime};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
pub enum RecordOutcome {
    Imported { proposal_id: i64, outcome: UpsertOutcome },
    Skipped(String),
}

#[derive(Debug, Clone, Default)]
pub struct ImportStats {
    pub proposals_created: usize,
    pub proposals_updated: usize,
    pub proposals_unchanged: usize,
    pub records_skipped: usize,
    pub records_failed: usize,
    pub votes_created: usize,
    pub votes_updated: usize,
    pub votes_unresolved: usize,
}

#[derive(Debug, Default)]
struct VoteStats {
    created: usize,
    updated: usize,
    unresolved: usize,
}

enum ProposalUpsert {
    Done {
        id: i64,
        outcome: UpsertOutcome,
        votes: VoteStats,
    },
    Skipped(String),
}

// Drives one dump import: holds the mandate index, the reconciliation cache
// and the directory seam for the whole run. The connection is passed per
// call so each proposal gets its own transaction.
pub struct Importer<'a> {
    pub index: MandateIndex,
    pub cache: ReconCache,
    directory: &'a dyn DirectoryLookup,
    pub stats: ImportStats,
}

impl<'a> Importer<'a> {
    pub fn new(
        conn: &Connection,
        cache: ReconCache,
        directory: &'a dyn DirectoryLookup,
    ) -> Result<Self> {
        let index = MandateIndex::load(conn)?;
        info!("loaded {} country mandates", index.len());
        Ok(Self {
            index,
            cache,
            directory,
            stats: ImportStats::default(),
        })
    }

    // Import a single dump record. Malformed records are skipped, never
    // fatal; an Err here means the proposal's transaction was rolled back.
    pub fn import_record(&mut self, conn: &mut Connection, value: &Value) -> Result<RecordOutcome> {
        let record: ProposalRecord = match serde_json::from_value(value.clone()) {
            Ok(record) => record,
            Err(err) => return Ok(self.skip(format!("undecodable proposal record: {err}"))),
        };
        let display = record.display();

        let Some(kind) = record.issue_type.clone() else {
            return Ok(self.skip(format!("proposal {display} has no issue type")));
        };
        let datetime = match db::parse_timestamp(&record.ts) {
            Ok(datetime) => datetime,
            Err(err) => return Ok(self.skip(format!("proposal {display}: {err:#}"))),
        };

        let dossier_id = self.resolve_dossier(conn, &record)?;
        let proposal_display = &display;
        info!("parsing proposal {}", proposal_display);

        let tx = conn.transaction()?;
        match self.upsert_proposal(&tx, dossier_id, &record, &kind, datetime)? {
            ProposalUpsert::Skipped(reason) => {
                // Dropping the transaction rolls back the whole proposal.
                drop(tx);
                Ok(self.skip(reason))
            }
            ProposalUpsert::Done { id, outcome, votes } => {
                tx.commit()?;
                match outcome {
                    UpsertOutcome::Created => self.stats.proposals_created += 1,
                    UpsertOutcome::Updated => self.stats.proposals_updated += 1,
                    UpsertOutcome::Unchanged => self.stats.proposals_unchanged += 1,
                }
                self.stats.votes_created += votes.created;
                self.stats.votes_updated += votes.updated;
                self.stats.votes_unresolved += votes.unresolved;
                Ok(RecordOutcome::Imported { proposal_id: id, outcome })
            }
        }
    }

    fn skip(&mut self, reason: String) -> RecordOutcome {
        warn!("{reason}");
        self.stats.records_skipped += 1;
        RecordOutcome::Skipped(reason)
    }

    // Dossier reference comes from epref, falling back to the report
    // reference. Title and link are refreshed independently when they differ.
    fn resolve_dossier(&self, conn: &Connection, record: &ProposalRecord) -> Result<i64> {
        let mut reference = record.epref.clone().unwrap_or_default();
        let mut title = record.eptitle.clone().unwrap_or_default();

        if reference.is_empty() {
            warn!("no dossier for proposal {}", record.display());
            title = record.title.clone();
            reference = record.report.clone().unwrap_or_default();
        }

        let link = format!(
            "http://www.europarl.europa.eu/oeil/popups/ficheprocedure.do?reference={reference}"
        );

        if let Some(existing) = db::dossier_by_reference(conn, &reference)? {
            // Only move the title when the dump actually supplied one.
            if !title.is_empty() && title != existing.title {
                db::update_dossier_title(conn, existing.id, &title)?;
            }
            if link != existing.link {
                db::update_dossier_link(conn, existing.id, &link)?;
            }
            return Ok(existing.id);
        }

        if title.is_empty() {
            // New dossier without a dump title: ask the metadata service.
            title = match self.directory.dossier_title(&reference) {
                Ok(Some(fetched)) => fetched,
                Ok(None) => {
                    warn!("no dossier title for proposal {}", record.display());
                    record.title.clone()
                }
                Err(err) => {
                    warn!("dossier lookup failed for {reference}: {err:#}");
                    record.title.clone()
                }
            };
        }
        db::insert_dossier(conn, &reference, &title, &link)
    }

    fn upsert_proposal(
        &mut self,
        tx: &Connection,
        dossier_id: i64,
        record: &ProposalRecord,
        kind: &str,
        datetime: PrimitiveDateTime,
    ) -> Result<ProposalUpsert> {
        let reference = record.report.clone().unwrap_or_default();
        let datetime_text = datetime.format(DATETIME_FORMAT)?;
        let total_for = record.declared_total(Position::For);
        let total_abstain = record.declared_total(Position::Abstain);
        let total_against = record.declared_total(Position::Against);

        let (proposal_id, outcome) = match db::proposal_by_key(tx, dossier_id, &reference, kind)? {
            Some(existing) => {
                let changed = existing.title != record.title
                    || existing.datetime != datetime_text
                    || existing.total_for != total_for
                    || existing.total_abstain != total_abstain
                    || existing.total_against != total_against;
                if changed {
                    db::update_proposal_fields(
                        tx,
                        existing.id,
                        &record.title,
                        &datetime_text,
                        total_for,
                        total_abstain,
                        total_against,
                    )?;
                    (existing.id, UpsertOutcome::Updated)
                } else {
                    (existing.id, UpsertOutcome::Unchanged)
                }
            }
            None => {
                let id = db::insert_proposal(
                    tx,
                    dossier_id,
                    &reference,
                    kind,
                    &record.title,
                    &datetime_text,
                    total_for,
                    total_abstain,
                    total_against,
                )?;
                (id, UpsertOutcome::Created)
            }
        };

        let votes = match self.reconcile_votes(tx, proposal_id, record, datetime.date())? {
            Some(votes) => votes,
            None => {
                return Ok(ProposalUpsert::Skipped(format!(
                    "proposal {} carries a vote entry that is not a name",
                    record.display()
                )));
            }
        };

        Ok(ProposalUpsert::Done { id: proposal_id, outcome, votes })
    }

    // One pass over every declared position. Existing votes are located by
    // resolved representative, or by display name when unresolved, and only
    // a differing position is written. Returns None on a malformed entry.
    fn reconcile_votes(
        &mut self,
        tx: &Connection,
        proposal_id: i64,
        record: &ProposalRecord,
        vote_date: Date,
    ) -> Result<Option<VoteStats>> {
        let mut stats = VoteStats::default();
        let mut resolver = Resolver::new(&self.index, &mut self.cache, self.directory);

        for position in Position::ALL {
            let Some(block) = record.block(position) else {
                continue;
            };
            for ballot in &block.groups {
                for entry in &ballot.votes {
                    let Some(raw_name) = entry.representative_name() else {
                        warn!(
                            proposal = %record.display(),
                            group = %ballot.group,
                            "vote entry is not a representative name"
                        );
                        return Ok(None);
                    };

                    let representative = resolver.resolve(raw_name, vote_date, &ballot.group);
                    let display_name = format!("{raw_name} ({})", ballot.group);
                    if representative.is_none() {
                        // Despite all efforts, unknown: keep the name only.
                        stats.unresolved += 1;
                        warn!("no representative found for vote {display_name}");
                    }

                    let existing = match representative {
                        Some(representative) => {
                            db::vote_by_representative(tx, proposal_id, representative)?
                        }
                        None => db::vote_by_display_name(tx, proposal_id, &display_name)?,
                    };
                    match existing {
                        Some(vote) => {
                            if vote.position != position.as_str() {
                                db::update_vote_position(tx, vote.id, position.as_str())?;
                                stats.updated += 1;
                            }
                        }
                        None => {
                            db::insert_vote(
                                tx,
                                proposal_id,
                                representative,
                                &display_name,
                                position.as_str(),
                            )?;
                            stats.created += 1;
                        }
                    }
                }
            }
        }
        Ok(Some(stats))
    }

    // Second chance for votes stored without a representative: parse the
    // "Name (GROUP)" display form back apart and run the pipeline again.
    pub fn remap_unresolved(&mut self, conn: &mut Connection) -> Result<usize> {
        let pattern = Regex::new(r"^([\w ]+) \((\w+)\)$")?;
        let unresolved = db::unresolved_votes(conn)?;
        info!("remapping {} unresolved votes", unresolved.len());

        let mut remapped = 0;
        for vote in unresolved {
            let Some(captures) = pattern.captures(&vote.representative_name) else {
                continue;
            };
            let name = &captures[1];
            let group = &captures[2];
            let date = db::parse_timestamp(&vote.proposal_datetime)?.date();
            let mut resolver = Resolver::new(&self.index, &mut self.cache, self.directory);
            if let Some(representative) = resolver.resolve(name, date, group) {
                db::set_vote_representative(conn, vote.vote_id, representative)?;
                remapped += 1;
            }
        }
        Ok(remapped)
    }
}

// Walk a whole dump. Per-record failures are logged and the loop moves on;
// the checkpoint advances after every record so --continue can resume.
pub fn import_dump(
    conn: &mut Connection,
    records: &[Value],
    importer: &mut Importer<'_>,
    resume: bool,
) -> Result<ImportStats> {
    let start_at = if resume { importer.cache.checkpoint() } else { 0 };
    if start_at > 0 {
        info!("resuming at record {start_at}");
    }

    for (index, value) in records.iter().enumerate() {
        if index < start_at {
            continue;
        }
        match importer.import_record(conn, value) {
            Ok(RecordOutcome::Imported { proposal_id, outcome }) => {
                debug!(index, proposal_id, ?outcome, "record imported");
            }
            Ok(RecordOutcome::Skipped(_)) => {}
            Err(err) => {
                warn!("record {index} failed and was rolled back: {err:#}");
                importer.stats.records_failed += 1;
            }
        }
        importer.cache.set_checkpoint(index);
    }

    Ok(importer.stats.clone())
}
