//! Authorization gate. Pure over (caller, action, owning student); consulted
//! before any store mutation and before returning project details.
//!
//! Teachers are unrestricted. Students only reach projects owned by their own
//! roster profile, and within an owned project may only post comments, toggle
//! milestone completion, and change project status. A student reading a
//! project they do not own gets NotFound rather than Forbidden so the
//! response does not confirm the project exists; denied mutations are
//! Forbidden.

use crate::{db::models::Role, error::AppError, middleware::auth::AuthUser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectAction {
    Read,
    Update,
    Delete,
    SetStatus,
    AddMilestone,
    /// `restricted_fields` is true when the patch touches anything other
    /// than the `completed` flag.
    UpdateMilestone { restricted_fields: bool },
    DeleteMilestone,
    AddComment,
}

pub fn require_teacher(caller: &AuthUser) -> Result<(), AppError> {
    match caller.role {
        Role::Teacher => Ok(()),
        Role::Student => Err(AppError::Forbidden(
            "Not authorized as a teacher".to_string(),
        )),
    }
}

pub fn check_project(
    caller: &AuthUser,
    action: ProjectAction,
    owner_student_id: &str,
) -> Result<(), AppError> {
    if caller.role == Role::Teacher {
        return Ok(());
    }

    let owns = caller.student_id.as_deref() == Some(owner_student_id);
    if !owns {
        return match action {
            ProjectAction::Read => Err(AppError::NotFound("Project not found".to_string())),
            _ => Err(AppError::Forbidden(
                "Not authorized to access this project".to_string(),
            )),
        };
    }

    match action {
        ProjectAction::Read
        | ProjectAction::SetStatus
        | ProjectAction::AddComment
        | ProjectAction::UpdateMilestone {
            restricted_fields: false,
        } => Ok(()),
        ProjectAction::UpdateMilestone {
            restricted_fields: true,
        } => Err(AppError::Forbidden(
            "Students may only update milestone completion".to_string(),
        )),
        ProjectAction::Update
        | ProjectAction::Delete
        | ProjectAction::AddMilestone
        | ProjectAction::DeleteMilestone => Err(AppError::Forbidden(
            "Not authorized as a teacher".to_string(),
        )),
    }
}

/// Roster reads: a teacher may read any profile, a student only their own.
/// A foreign profile id reads as NotFound.
pub fn check_student_read(caller: &AuthUser, student_id: &str) -> Result<(), AppError> {
    match caller.role {
        Role::Teacher => Ok(()),
        Role::Student if caller.student_id.as_deref() == Some(student_id) => Ok(()),
        Role::Student => Err(AppError::NotFound("Student not found".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teacher() -> AuthUser {
        AuthUser {
            id: "t1".to_string(),
            email: "t@example.com".to_string(),
            name: "Teacher".to_string(),
            role: Role::Teacher,
            student_id: None,
        }
    }

    fn student(profile: &str) -> AuthUser {
        AuthUser {
            id: "u1".to_string(),
            email: "s@example.com".to_string(),
            name: "Student".to_string(),
            role: Role::Student,
            student_id: Some(profile.to_string()),
        }
    }

    #[test]
    fn teacher_is_unrestricted() {
        for action in [
            ProjectAction::Read,
            ProjectAction::Update,
            ProjectAction::Delete,
            ProjectAction::AddMilestone,
            ProjectAction::DeleteMilestone,
            ProjectAction::SetStatus,
            ProjectAction::AddComment,
        ] {
            assert!(check_project(&teacher(), action, "s9").is_ok());
        }
    }

    #[test]
    fn student_read_on_foreign_project_is_not_found() {
        let err = check_project(&student("s1"), ProjectAction::Read, "s2").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn student_mutation_on_foreign_project_is_forbidden() {
        let err = check_project(&student("s1"), ProjectAction::SetStatus, "s2").unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn student_allowed_writes_on_own_project() {
        let caller = student("s1");
        assert!(check_project(&caller, ProjectAction::SetStatus, "s1").is_ok());
        assert!(check_project(&caller, ProjectAction::AddComment, "s1").is_ok());
        assert!(check_project(
            &caller,
            ProjectAction::UpdateMilestone {
                restricted_fields: false
            },
            "s1"
        )
        .is_ok());
    }

    #[test]
    fn structural_changes_are_teacher_only_even_for_the_owner() {
        let caller = student("s1");
        for action in [
            ProjectAction::Update,
            ProjectAction::Delete,
            ProjectAction::AddMilestone,
            ProjectAction::DeleteMilestone,
        ] {
            let err = check_project(&caller, action, "s1").unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)));
        }
    }

    #[test]
    fn student_milestone_patch_beyond_completed_is_rejected() {
        let err = check_project(
            &student("s1"),
            ProjectAction::UpdateMilestone {
                restricted_fields: true,
            },
            "s1",
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn student_without_profile_owns_nothing() {
        let mut caller = student("s1");
        caller.student_id = None;
        let err = check_project(&caller, ProjectAction::Read, "s1").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn roster_reads() {
        assert!(check_student_read(&teacher(), "s1").is_ok());
        assert!(check_student_read(&student("s1"), "s1").is_ok());
        assert!(matches!(
            check_student_read(&student("s1"), "s2").unwrap_err(),
            AppError::NotFound(_)
        ));
    }
}
