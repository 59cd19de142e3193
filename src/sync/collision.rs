//! ID-collision detection and remapping.
//!
//! Two clones that independently mint the same ID must be reconciled
//! without clobbering either side's content. Classification compares
//! timestamp-stripped content hashes; resolution mints a fresh ID for the
//! preferred copy and rewrites every inbound reference.

use crate::error::Result;
use crate::model::Issue;
use crate::storage::SqliteStorage;
use crate::util::{content_hash, format_id, parse_id};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

/// Outcome of matching one incoming set against the store.
#[derive(Debug, Default)]
pub struct Classification {
    /// Incoming IDs whose local copy has identical content.
    pub exact: Vec<String>,
    /// Same ID minted independently on both sides: the copies carry
    /// different birth timestamps and divergent content.
    pub collisions: Vec<CollisionPair>,
    /// Same lineage (identical `created_at`), divergent content: a normal
    /// upstream edit, reconciled field by field.
    pub divergent: Vec<String>,
    /// IDs with no local copy.
    pub new_issues: Vec<String>,
}

/// A contested ID with both copies.
#[derive(Debug, Clone)]
pub struct CollisionPair {
    pub local: Issue,
    pub incoming: Issue,
}

/// Classify incoming issues against the store.
///
/// `created_at` is minted once and round-trips through the JSONL, so two
/// copies of one lineage always agree on it: divergent content with the
/// same birth timestamp is an upstream edit, while the same ID with a
/// different birth timestamp was minted on both sides independently and
/// must be remapped. Both clones see the same pair of timestamps, so both
/// reach the same classification.
///
/// # Errors
///
/// Returns an error if the store cannot be read.
pub fn classify(storage: &SqliteStorage, incoming: &[Issue]) -> Result<Classification> {
    let mut result = Classification::default();

    for issue in incoming {
        match storage.get_issue_full(&issue.id)? {
            None => result.new_issues.push(issue.id.clone()),
            Some(local) => {
                if content_hash(&local) == content_hash(issue) {
                    result.exact.push(issue.id.clone());
                } else if local.created_at == issue.created_at {
                    result.divergent.push(issue.id.clone());
                } else {
                    result.collisions.push(CollisionPair {
                        local,
                        incoming: issue.clone(),
                    });
                }
            }
        }
    }

    Ok(result)
}

/// Resolve collisions in place.
///
/// For each contested ID the preferred copy (see [`preference`]) is moved to
/// a fresh ID minted past every number live in the store or the incoming
/// set; the other copy keeps the contested ID. When the local copy wins it
/// is renamed in the store; when the incoming copy wins its entry in
/// `incoming` is re-keyed, so the caller's normal reconcile pass inserts it
/// under the fresh ID. Text and dependency references to remapped IDs are
/// rewritten on both sides.
///
/// Returns the `old -> new` mapping (empty when there were no collisions).
///
/// # Errors
///
/// Returns an error if a rename or rewrite fails; the store may then hold a
/// partial remap, which the next import run repairs (the mapping is
/// deterministic).
pub fn resolve_collisions(
    storage: &mut SqliteStorage,
    collisions: &[CollisionPair],
    incoming: &mut [Issue],
    actor: &str,
) -> Result<HashMap<String, String>> {
    if collisions.is_empty() {
        return Ok(HashMap::new());
    }

    let mut minter = IdMinter::new(storage, incoming)?;
    let mut mapping: HashMap<String, String> = HashMap::new();

    // Sorted by contested ID so every clone walks the same order.
    let mut ordered: Vec<&CollisionPair> = collisions.iter().collect();
    ordered.sort_by(|a, b| a.local.id.cmp(&b.local.id));

    for pair in ordered {
        let contested = pair.local.id.clone();
        let fresh = minter.mint(&contested)?;

        if preference(&pair.local, &pair.incoming) == Winner::Local {
            storage.update_issue_id(&contested, &fresh, actor)?;
        } else if let Some(entry) = incoming.iter_mut().find(|i| i.id == contested) {
            // The re-keyed entry's embedded edges are normalized by
            // apply_mapping_to_issue below.
            entry.id.clone_from(&fresh);
        }

        mapping.insert(contested, fresh);
    }

    rewrite_store_references(storage, &mapping, actor)?;
    for issue in incoming.iter_mut() {
        apply_mapping_to_issue(issue, &mapping);
    }

    Ok(mapping)
}

#[derive(Debug, PartialEq, Eq)]
enum Winner {
    Local,
    Incoming,
}

/// Deterministic preference between two copies of a contested ID.
///
/// Scoring vector: strictly newer `updated_at` +8; non-empty description
/// +2, design +1, acceptance criteria +1; comment count capped at 4;
/// dependency count capped at 4. Ties break on the lexicographically
/// smaller content hash, so two clones comparing the same pair of copies
/// always agree regardless of which side is "local".
fn preference(local: &Issue, incoming: &Issue) -> Winner {
    let mut local_score = substance_score(local);
    let mut incoming_score = substance_score(incoming);

    if local.updated_at > incoming.updated_at {
        local_score += 8;
    } else if incoming.updated_at > local.updated_at {
        incoming_score += 8;
    }

    match local_score.cmp(&incoming_score) {
        std::cmp::Ordering::Greater => Winner::Local,
        std::cmp::Ordering::Less => Winner::Incoming,
        std::cmp::Ordering::Equal => {
            if content_hash(local) <= content_hash(incoming) {
                Winner::Local
            } else {
                Winner::Incoming
            }
        }
    }
}

fn substance_score(issue: &Issue) -> i64 {
    let mut score = 0;
    if issue.description.as_deref().is_some_and(|d| !d.is_empty()) {
        score += 2;
    }
    if issue.design.as_deref().is_some_and(|d| !d.is_empty()) {
        score += 1;
    }
    if issue
        .acceptance_criteria
        .as_deref()
        .is_some_and(|a| !a.is_empty())
    {
        score += 1;
    }
    score += i64::try_from(issue.comments.len().min(4)).unwrap_or(4);
    score += i64::try_from(issue.dependencies.len().min(4)).unwrap_or(4);
    score
}

/// Mints fresh numbers past everything live in the store or incoming set.
struct IdMinter {
    next_by_prefix: HashMap<String, u64>,
}

impl IdMinter {
    fn new(storage: &SqliteStorage, incoming: &[Issue]) -> Result<Self> {
        let mut max_by_prefix: HashMap<String, u64> = HashMap::new();

        let mut observe = |id: &str| {
            if let Ok(parsed) = parse_id(id) {
                let entry = max_by_prefix.entry(parsed.prefix).or_insert(0);
                *entry = (*entry).max(parsed.number);
            }
        };
        for id in storage.get_all_ids()? {
            observe(&id);
        }
        for issue in incoming {
            observe(&issue.id);
        }

        Ok(Self {
            next_by_prefix: max_by_prefix
                .into_iter()
                .map(|(prefix, max)| (prefix, max + 1))
                .collect(),
        })
    }

    fn mint(&mut self, contested_id: &str) -> Result<String> {
        let parsed = parse_id(contested_id)?;
        let next = self.next_by_prefix.entry(parsed.prefix.clone()).or_insert(1);
        let number = *next;
        *next += 1;
        Ok(format_id(&parsed.prefix, number))
    }
}

/// Issue-ID token inside free text: prefix-number with no ID-character on
/// either side. IDs contain hyphens, so regex `\b` would split them; the
/// boundary is explicitly "not `[A-Za-z0-9_-]`".
static ID_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|[^A-Za-z0-9_-])([a-z][a-z0-9]{0,7}-[0-9]+)($|[^A-Za-z0-9_-])")
        .unwrap_or_else(|e| panic!("invalid ID token pattern: {e}"))
});

/// Rewrite every whole-ID reference in `text` through `mapping`.
///
/// `bd-10` is never matched inside `bd-100`. Runs to a fixed point because
/// a single pass cannot see a token whose leading boundary character was
/// consumed by the previous match (e.g. two IDs separated by one space).
#[must_use]
pub fn rewrite_id_references(text: &str, mapping: &HashMap<String, String>) -> String {
    let mut current = text.to_string();
    loop {
        let next = ID_TOKEN
            .replace_all(&current, |caps: &Captures| {
                let id = &caps[2];
                let replacement = mapping.get(id).map_or(id, String::as_str);
                format!("{}{}{}", &caps[1], replacement, &caps[3])
            })
            .into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Rewrite text references in every stored issue through `mapping`. Used
/// after collision remaps and explicit prefix renames.
pub(crate) fn rewrite_store_references(
    storage: &mut SqliteStorage,
    mapping: &HashMap<String, String>,
    actor: &str,
) -> Result<()> {
    if mapping.is_empty() {
        return Ok(());
    }

    for id in storage.get_all_ids()? {
        let Some(issue) = storage.get_issue(&id)? else {
            continue;
        };

        let mut update = crate::storage::IssueUpdate::default();
        let mut changed = false;

        let mut rewrite_field =
            |value: &Option<String>, slot: &mut Option<Option<String>>, changed: &mut bool| {
                if let Some(text) = value {
                    let rewritten = rewrite_id_references(text, mapping);
                    if rewritten != *text {
                        *slot = Some(Some(rewritten));
                        *changed = true;
                    }
                }
            };

        rewrite_field(&issue.description, &mut update.description, &mut changed);
        rewrite_field(&issue.design, &mut update.design, &mut changed);
        rewrite_field(
            &issue.acceptance_criteria,
            &mut update.acceptance_criteria,
            &mut changed,
        );
        rewrite_field(&issue.notes, &mut update.notes, &mut changed);

        if changed {
            storage.update_issue(&id, &update, actor)?;
        }
    }

    Ok(())
}

/// Rewrite an incoming issue's text fields and dependency endpoints through
/// the mapping before it is reconciled into the store.
pub fn apply_mapping_to_issue(issue: &mut Issue, mapping: &HashMap<String, String>) {
    if mapping.is_empty() {
        return;
    }

    for field in [
        &mut issue.description,
        &mut issue.design,
        &mut issue.acceptance_criteria,
        &mut issue.notes,
    ] {
        if let Some(text) = field {
            let rewritten = rewrite_id_references(text, mapping);
            if rewritten != *text {
                *field = Some(rewritten);
            }
        }
    }

    for dep in &mut issue.dependencies {
        // Ownership always tracks the issue the edge is embedded under;
        // only the target follows the mapping.
        dep.issue_id.clone_from(&issue.id);
        if let Some(new_id) = mapping.get(&dep.depends_on_id) {
            dep.depends_on_id.clone_from(new_id);
        }
    }
}
