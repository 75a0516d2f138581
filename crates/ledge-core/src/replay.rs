//! Conflict-aware patch replay
//!
//! Applies a stored patch to the current working copy with three-way
//! comparison per path: the baseline state recorded in the patch, the state
//! the patch wants to produce, and the state currently on disk.
//!
//! The whole apply is all-or-nothing. Planning is read-only over the entire
//! patch; if any path conflicts nothing is written and the conflicting paths
//! are reported. The commit keeps an undo log (pre-state of every touched
//! path) and rolls back fully if a write fails mid-way.

use std::path::{Path, PathBuf};

use crate::codec;
use crate::error::LedgeResult;
use crate::types::{ChangeKind, ChangeRecord, Patch, PropertyMap, content_digest};
use crate::workspace::WorkingCopy;

/// Result of applying a patch
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Every path applied; lists the paths that were changed
    Applied { paths: Vec<PathBuf> },
    /// One or more paths conflicted; the working copy was left untouched
    Conflicts { paths: Vec<PathBuf> },
}

#[derive(Debug)]
enum PlanAction {
    /// Nothing to do (already applied, or delete of an absent path)
    Noop,
    /// Remove the file and clear its properties
    Remove,
    /// Write content (when `Some`) and set the merged property map
    Write {
        content: Option<Vec<u8>>,
        props: PropertyMap,
    },
}

#[derive(Debug)]
struct PathPlan {
    path: PathBuf,
    action: PlanAction,
    // Pre-state, kept for rollback.
    pre_content: Option<Vec<u8>>,
    pre_props: PropertyMap,
}

/// Apply a patch to the working copy, all-or-nothing
pub async fn apply(patch: &Patch, wc: &WorkingCopy) -> LedgeResult<ApplyOutcome> {
    let (delta, baseline) = codec::decode(patch)?;
    tracing::debug!(
        "applying patch against baseline {} ({} record(s))",
        baseline,
        delta.len()
    );

    // Plan phase: read-only three-way comparison for every path.
    let mut plans = Vec::new();
    let mut conflicts = Vec::new();
    for record in delta.records() {
        let cur_content = wc.read(&record.path).await?;
        let cur_props = wc.props(&record.path).await?;
        match plan_record(record, cur_content.as_deref(), &cur_props) {
            Some(action) => plans.push(PathPlan {
                path: record.path.clone(),
                action,
                pre_content: cur_content,
                pre_props: cur_props,
            }),
            None => conflicts.push(record.path.clone()),
        }
    }

    if !conflicts.is_empty() {
        tracing::info!("patch conflicts on {} path(s)", conflicts.len());
        return Ok(ApplyOutcome::Conflicts { paths: conflicts });
    }

    // Commit phase: apply every plan, rolling back on the first failure.
    // The in-flight plan joins the undo set before it executes: a failure
    // between its content write and its property update must restore it too.
    let mut applied: Vec<usize> = Vec::new();
    for (index, plan) in plans.iter().enumerate() {
        applied.push(index);
        if let Err(error) = execute(wc, plan).await {
            rollback(wc, &plans, &applied).await;
            return Err(error);
        }
    }

    let paths = plans
        .iter()
        .filter(|p| !matches!(p.action, PlanAction::Noop))
        .map(|p| p.path.clone())
        .collect();
    Ok(ApplyOutcome::Applied { paths })
}

/// Decide what to do for one record; `None` marks a conflict
fn plan_record(
    record: &ChangeRecord,
    cur_content: Option<&[u8]>,
    cur_props: &PropertyMap,
) -> Option<PlanAction> {
    match record.kind {
        ChangeKind::Add | ChangeKind::AddWithProps => {
            let target = record.content.as_deref().unwrap_or_default();
            match cur_content {
                // The path appeared since capture: identical content and
                // properties are a no-op, anything else is a conflict.
                Some(cur) => {
                    if cur == target && *cur_props == record.props {
                        Some(PlanAction::Noop)
                    } else {
                        None
                    }
                }
                None => Some(PlanAction::Write {
                    content: Some(target.to_vec()),
                    props: record.props.clone(),
                }),
            }
        }
        ChangeKind::Delete => {
            match cur_content {
                // Already deleted locally: non-conflicting no-op.
                None => Some(PlanAction::Noop),
                Some(cur) => {
                    let unmoved = record.base_digest.as_deref()
                        == Some(content_digest(cur).as_str())
                        && *cur_props == record.base_props;
                    if unmoved { Some(PlanAction::Remove) } else { None }
                }
            }
        }
        ChangeKind::TextEdit | ChangeKind::PropertyEdit => {
            plan_edit(record, cur_content, cur_props)
        }
    }
}

/// Three-way merge for an edit record: content at whole-file granularity,
/// properties at key granularity
fn plan_edit(
    record: &ChangeRecord,
    cur_content: Option<&[u8]>,
    cur_props: &PropertyMap,
) -> Option<PlanAction> {
    let new_content = match &record.content {
        Some(target) => match cur_content {
            Some(cur) if record.base_digest.as_deref() == Some(content_digest(cur).as_str()) => {
                Some(target.clone())
            }
            // Local edit landed on the same content the patch produces.
            Some(cur) if cur == target.as_slice() => None,
            // Locally modified or deleted in a way that overlaps the patch.
            _ => return None,
        },
        None => {
            // Property-only record for a file: the file must still exist,
            // but its content may have moved (non-overlapping change).
            if record.base_digest.is_some() && cur_content.is_none() {
                return None;
            }
            None
        }
    };

    // Merge properties key by key: keys the patch does not touch keep their
    // current values, touched keys must not have moved since capture.
    let mut merged = cur_props.clone();
    for key in record.touched_prop_keys() {
        let base_value = record.base_props.get(key);
        let new_value = record.props.get(key);
        let cur_value = cur_props.get(key);

        if cur_value == base_value {
            match new_value {
                Some(value) => {
                    merged.insert(key.to_string(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        } else if cur_value != new_value {
            return None;
        }
    }

    if new_content.is_none() && merged == *cur_props {
        Some(PlanAction::Noop)
    } else {
        Some(PlanAction::Write {
            content: new_content,
            props: merged,
        })
    }
}

async fn execute(wc: &WorkingCopy, plan: &PathPlan) -> LedgeResult<()> {
    match &plan.action {
        PlanAction::Noop => Ok(()),
        PlanAction::Remove => {
            wc.remove(&plan.path).await?;
            wc.set_props(&plan.path, PropertyMap::new()).await
        }
        PlanAction::Write { content, props } => {
            if let Some(content) = content {
                wc.write(&plan.path, content).await?;
            }
            wc.set_props(&plan.path, props.clone()).await
        }
    }
}

/// Restore the pre-state of every already-applied plan, in reverse order
async fn rollback(wc: &WorkingCopy, plans: &[PathPlan], applied: &[usize]) {
    for &index in applied.iter().rev() {
        let plan = &plans[index];
        let restore = restore_path(wc, &plan.path, &plan.pre_content, &plan.pre_props).await;
        if let Err(error) = restore {
            tracing::error!("rollback failed for {:?}: {}", plan.path, error);
        }
    }
}

async fn restore_path(
    wc: &WorkingCopy,
    path: &Path,
    pre_content: &Option<Vec<u8>>,
    pre_props: &PropertyMap,
) -> LedgeResult<()> {
    match pre_content {
        Some(content) => wc.write(path, content).await?,
        None => wc.remove(path).await?,
    }
    wc.set_props(path, pre_props.clone()).await
}
