//! Attaching memos to transactions inside a parsed document.
//!
//! Two independent walks live here:
//! - [`apply_memos`] merges stored memos into any record carrying a `FITID`.
//! - [`set_memo`] annotates exactly one transaction under a `STMTTRN` field,
//!   after checking the FITID is present and unique.

use tracing::debug;

use crate::document::{Node, Record, Segment};
use crate::error::{OfxError, Result};
use crate::memo::MemoRecord;

pub const FITID: &str = "FITID";
pub const MEMO: &str = "MEMO";
pub const TRANSACTION: &str = "STMTTRN";
pub const ACCOUNT_ID: &str = "ACCTID";
/// Records identifying the account a statement belongs to.
pub const ACCOUNT_FIELDS: [&str; 2] = ["BANKACCTFROM", "CCACCTFROM"];

/// Overwrite the memo of every record whose FITID matches a stored memo.
/// When several stored records share a FITID the last one wins.
/// Returns how many records were annotated.
pub fn apply_memos(root: &mut Node, memos: &[MemoRecord]) -> usize {
    if memos.is_empty() {
        return 0;
    }
    let mut applied = 0;
    walk_apply(root, memos, &mut applied);
    applied
}

fn walk_apply(node: &mut Node, memos: &[MemoRecord], applied: &mut usize) {
    match node {
        Node::Record(rec) => {
            let memo = rec
                .text(FITID)
                .and_then(|fitid| memos.iter().rev().find(|m| m.fitid == fitid))
                .map(|m| m.memo.clone());
            if let Some(memo) = memo {
                rec.insert(MEMO, Node::text(memo));
                *applied += 1;
            }
            for (_, child) in rec.iter_mut() {
                walk_apply(child, memos, applied);
            }
        }
        Node::Sequence(items) => {
            for item in items {
                walk_apply(item, memos, applied);
            }
        }
        Node::Scalar(_) => {}
    }
}

/// One transaction matching the FITID being annotated.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionHit {
    /// Structural path from the document root to the transaction record.
    pub path: Vec<Segment>,
    pub has_memo: bool,
    pub account_id: Option<String>,
}

/// Every transaction under a `STMTTRN` field whose FITID equals `fitid`.
pub fn find_transactions(root: &Node, fitid: &str) -> Vec<TransactionHit> {
    let mut hits = Vec::new();
    let mut path = Vec::new();
    walk_find(root, fitid, None, &mut path, &mut hits);
    hits
}

fn walk_find(
    node: &Node,
    fitid: &str,
    account: Option<&str>,
    path: &mut Vec<Segment>,
    hits: &mut Vec<TransactionHit>,
) {
    match node {
        Node::Record(rec) => {
            let account = statement_account(rec).or(account);
            for (key, child) in rec.iter() {
                path.push(Segment::name(key));
                if key == TRANSACTION {
                    collect_hits(child, fitid, account, path, hits);
                }
                walk_find(child, fitid, account, path, hits);
                path.pop();
            }
        }
        Node::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                path.push(Segment::Index(i));
                walk_find(item, fitid, account, path, hits);
                path.pop();
            }
        }
        Node::Scalar(_) => {}
    }
}

/// A `STMTTRN` value is either a sequence of transactions or, when the
/// dialect did not mark it as repeated, a single transaction record.
fn collect_hits(
    node: &Node,
    fitid: &str,
    account: Option<&str>,
    path: &[Segment],
    hits: &mut Vec<TransactionHit>,
) {
    let mut check = |rec: &Record, path: Vec<Segment>| {
        if rec.text(FITID) == Some(fitid) {
            hits.push(TransactionHit {
                path,
                has_memo: rec.contains_key(MEMO),
                account_id: account.map(str::to_string),
            });
        }
    };
    match node {
        Node::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                if let Some(rec) = item.as_record() {
                    let mut p = path.to_vec();
                    p.push(Segment::Index(i));
                    check(rec, p);
                }
            }
        }
        Node::Record(rec) => check(rec, path.to_vec()),
        Node::Scalar(_) => {}
    }
}

fn statement_account(rec: &Record) -> Option<&str> {
    ACCOUNT_FIELDS
        .iter()
        .find_map(|field| rec.get(field)?.as_record()?.text(ACCOUNT_ID))
}

/// Set the memo of the single transaction carrying `fitid`.
///
/// Fails when the FITID is missing, appears more than once, or the
/// transaction already has a memo and `allow_overwrite` is false. The
/// document is left untouched on failure. Returns the account id of the
/// statement holding the transaction, when one is present.
pub fn set_memo(
    root: &mut Node,
    fitid: &str,
    memo: &str,
    allow_overwrite: bool,
) -> Result<Option<String>> {
    let mut hits = find_transactions(root, fitid);
    let hit = match hits.len() {
        0 => return Err(OfxError::FitidNotFound(fitid.to_string())),
        1 => hits.remove(0),
        count => {
            return Err(OfxError::FitidNotUnique {
                fitid: fitid.to_string(),
                count,
            });
        }
    };
    if hit.has_memo && !allow_overwrite {
        return Err(OfxError::MemoExists(fitid.to_string()));
    }

    let rec = root
        .at_mut(&hit.path)
        .and_then(Node::as_record_mut)
        .ok_or_else(|| OfxError::FitidNotFound(fitid.to_string()))?;
    rec.insert(MEMO, Node::text(memo));
    debug!(fitid, account = ?hit.account_id, "memo set");
    Ok(hit.account_id)
}
