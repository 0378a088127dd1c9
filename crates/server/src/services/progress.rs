//! Progress engine. Project progress is stored, never caller-set, and
//! recomputed from the persisted milestone rows inside the same transaction
//! as every milestone mutation.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{db::models::ProjectStatus, error::Result};

/// round(100 * completed / total); None when the milestone set is empty, in
/// which case the stored value is left as last persisted.
pub fn percent(completed: i64, total: i64) -> Option<i64> {
    if total <= 0 {
        return None;
    }
    Some((100.0 * completed as f64 / total as f64).round() as i64)
}

pub async fn recompute(conn: &mut SqliteConnection, project_id: &str) -> Result<()> {
    let (total, completed): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(completed), 0) FROM milestones WHERE project_id = ?",
    )
    .bind(project_id)
    .fetch_one(&mut *conn)
    .await?;

    if let Some(progress) = percent(completed, total) {
        sqlx::query("UPDATE projects SET progress = ?, updated_at = ? WHERE id = ?")
            .bind(progress)
            .bind(Utc::now())
            .bind(project_id)
            .execute(conn)
            .await?;
    }

    Ok(())
}

/// Completed carries a completion timestamp (kept if already set); every
/// other status clears it.
pub fn completion_timestamp(
    status: ProjectStatus,
    current: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match status {
        ProjectStatus::Completed => current.or_else(|| Some(Utc::now())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_nearest_integer() {
        assert_eq!(percent(2, 4), Some(50));
        assert_eq!(percent(1, 3), Some(33));
        assert_eq!(percent(2, 3), Some(67));
        assert_eq!(percent(0, 5), Some(0));
        assert_eq!(percent(5, 5), Some(100));
    }

    #[test]
    fn empty_milestone_set_leaves_progress_alone() {
        assert_eq!(percent(0, 0), None);
    }

    #[test]
    fn completed_sets_and_keeps_timestamp() {
        let stamped = completion_timestamp(ProjectStatus::Completed, None);
        assert!(stamped.is_some());

        let kept = completion_timestamp(ProjectStatus::Completed, stamped);
        assert_eq!(kept, stamped);
    }

    #[test]
    fn leaving_completed_clears_timestamp() {
        let stamped = completion_timestamp(ProjectStatus::Completed, None);
        for status in [
            ProjectStatus::NotStarted,
            ProjectStatus::InProgress,
            ProjectStatus::Delayed,
        ] {
            assert_eq!(completion_timestamp(status, stamped), None);
        }
    }
}
