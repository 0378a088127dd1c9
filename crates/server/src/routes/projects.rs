use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::{
    db::models::{Comment, Milestone, Project, ProjectStatus, Role},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::{
        authz::{self, ProjectAction},
        progress,
        query::{self, PageParams, Pagination},
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route("/stats", get(project_stats))
        .route(
            "/:id",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/:id/status", patch(set_project_status))
        .route("/:id/milestones", post(add_milestone))
        .route(
            "/:id/milestones/:milestone_id",
            patch(update_milestone).delete(delete_milestone),
        )
        .route("/:id/comments", post(add_comment))
}

#[derive(Debug, Deserialize)]
pub struct ListProjectsQuery {
    pub status: Option<ProjectStatus>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StudentSummary {
    pub id: String,
    pub name: String,
    pub enrollment_number: String,
    pub roll_number: String,
}

#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub student: StudentSummary,
    pub start_date: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub status: ProjectStatus,
    pub progress: i64,
    pub tags: Vec<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetailResponse {
    #[serde(flatten)]
    pub project: ProjectResponse,
    pub milestones: Vec<Milestone>,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Serialize)]
pub struct ProjectListResponse {
    pub count: usize,
    pub total: i64,
    pub total_pages: i64,
    pub pagination: Pagination,
    pub data: Vec<ProjectResponse>,
}

#[derive(Debug, sqlx::FromRow)]
struct ProjectWithStudent {
    #[sqlx(flatten)]
    project: Project,
    student_name: String,
    enrollment_number: String,
    roll_number: String,
}

impl From<ProjectWithStudent> for ProjectResponse {
    fn from(row: ProjectWithStudent) -> Self {
        let p = row.project;
        Self {
            id: p.id,
            title: p.title,
            description: p.description,
            student: StudentSummary {
                id: p.student_id,
                name: row.student_name,
                enrollment_number: row.enrollment_number,
                roll_number: row.roll_number,
            },
            start_date: p.start_date,
            deadline: p.deadline,
            status: p.status,
            progress: p.progress,
            tags: serde_json::from_str(&p.tags).unwrap_or_default(),
            completed_at: p.completed_at,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

fn sort_column(key: &str) -> Option<&'static str> {
    Some(match key {
        "createdAt" => "created_at",
        "updatedAt" => "updated_at",
        "startDate" => "start_date",
        "deadline" => "deadline",
        "title" => "title",
        "status" => "status",
        "progress" => "progress",
        _ => return None,
    })
}

fn push_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    scope: Option<&str>,
    status: Option<ProjectStatus>,
    search: Option<&str>,
) {
    if let Some(student_id) = scope {
        qb.push(" AND p.student_id = ").push_bind(student_id.to_string());
    }
    if let Some(status) = status {
        qb.push(" AND p.status = ").push_bind(status);
    }
    if let Some(search) = search {
        if !search.trim().is_empty() {
            let pattern = query::search_pattern(search.trim());
            qb.push(" AND (LOWER(p.title) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR LOWER(p.description) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
    }
}

async fn list_projects(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<ListProjectsQuery>,
) -> Result<Json<ProjectListResponse>> {
    let params = PageParams::new(q.page, q.limit)?;

    // Students are narrowed to their own projects before any other filter.
    let scope = match user.role {
        Role::Teacher => None,
        Role::Student => Some(user.student_id.clone().ok_or_else(|| {
            AppError::NotFound("Student profile not found".to_string())
        })?),
    };

    let (key, dir) = query::split_sort(q.sort.as_deref().unwrap_or("-createdAt"));
    let column = sort_column(key)
        .ok_or_else(|| AppError::Validation(format!("Unknown sort key: {key}")))?;

    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM projects p WHERE 1 = 1");
    push_filters(&mut count_qb, scope.as_deref(), q.status, q.search.as_deref());
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(&state.db.pool)
        .await?;

    let mut qb = QueryBuilder::new(
        r#"
        SELECT p.*, s.name AS student_name, s.enrollment_number, s.roll_number
        FROM projects p
        JOIN students s ON s.id = p.student_id
        WHERE 1 = 1
        "#,
    );
    push_filters(&mut qb, scope.as_deref(), q.status, q.search.as_deref());
    qb.push(format!(" ORDER BY p.{column} {}, p.id ASC", dir.sql()));
    qb.push(" LIMIT ")
        .push_bind(params.limit)
        .push(" OFFSET ")
        .push_bind(params.offset());

    let rows: Vec<ProjectWithStudent> = qb.build_query_as().fetch_all(&state.db.pool).await?;
    let data: Vec<ProjectResponse> = rows.into_iter().map(Into::into).collect();

    Ok(Json(ProjectListResponse {
        count: data.len(),
        total,
        total_pages: query::total_pages(total, params.limit),
        pagination: query::paginate(total, &params),
        data,
    }))
}

async fn fetch_project(pool: &SqlitePool, id: &str) -> Result<Project> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Project not found".to_string()))
}

async fn load_detail(pool: &SqlitePool, id: &str) -> Result<ProjectDetailResponse> {
    let row = sqlx::query_as::<_, ProjectWithStudent>(
        r#"
        SELECT p.*, s.name AS student_name, s.enrollment_number, s.roll_number
        FROM projects p
        JOIN students s ON s.id = p.student_id
        WHERE p.id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Project not found".to_string()))?;

    let milestones = sqlx::query_as::<_, Milestone>(
        "SELECT * FROM milestones WHERE project_id = ? ORDER BY position ASC, id ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let comments = sqlx::query_as::<_, Comment>(
        "SELECT * FROM comments WHERE project_id = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(ProjectDetailResponse {
        project: row.into(),
        milestones,
        comments,
    })
}

async fn get_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ProjectDetailResponse>> {
    let project = fetch_project(&state.db.pool, &id).await?;
    authz::check_project(&user, ProjectAction::Read, &project.student_id)?;

    Ok(Json(load_detail(&state.db.pool, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub title: String,
    pub description: String,
    pub student_id: String,
    pub deadline: DateTime<Utc>,
    pub start_date: Option<DateTime<Utc>>,
    pub status: Option<ProjectStatus>,
    pub tags: Option<Vec<String>>,
}

fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(AppError::Validation("Please add a project title".to_string()));
    }
    if title.len() > 100 {
        return Err(AppError::Validation(
            "Title cannot be more than 100 characters".to_string(),
        ));
    }
    Ok(())
}

async fn create_project(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateProjectRequest>,
) -> Result<Json<ProjectDetailResponse>> {
    authz::require_teacher(&user)?;

    validate_title(&body.title)?;
    if body.description.trim().is_empty() {
        return Err(AppError::Validation(
            "Please add a project description".to_string(),
        ));
    }

    let student_exists =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM students WHERE id = ?")
            .bind(&body.student_id)
            .fetch_one(&state.db.pool)
            .await?;
    if student_exists == 0 {
        return Err(AppError::NotFound("Student not found".to_string()));
    }

    let project_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let status = body.status.unwrap_or(ProjectStatus::NotStarted);
    let completed_at = progress::completion_timestamp(status, None);
    let tags = serde_json::to_string(&body.tags.unwrap_or_default())
        .unwrap_or_else(|_| "[]".to_string());

    sqlx::query(
        r#"
        INSERT INTO projects (id, title, description, student_id, start_date, deadline,
                              status, progress, tags, completed_at, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
        "#,
    )
    .bind(&project_id)
    .bind(body.title.trim())
    .bind(&body.description)
    .bind(&body.student_id)
    .bind(body.start_date.unwrap_or(now))
    .bind(body.deadline)
    .bind(status)
    .bind(&tags)
    .bind(completed_at)
    .bind(now)
    .bind(now)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(load_detail(&state.db.pool, &project_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub student_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub status: Option<ProjectStatus>,
    pub tags: Option<Vec<String>>,
}

async fn update_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectDetailResponse>> {
    let mut project = fetch_project(&state.db.pool, &id).await?;
    authz::check_project(&user, ProjectAction::Update, &project.student_id)?;

    if let Some(title) = body.title {
        validate_title(&title)?;
        project.title = title.trim().to_string();
    }
    if let Some(description) = body.description {
        if description.trim().is_empty() {
            return Err(AppError::Validation(
                "Please add a project description".to_string(),
            ));
        }
        project.description = description;
    }
    if let Some(student_id) = body.student_id {
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM students WHERE id = ?")
            .bind(&student_id)
            .fetch_one(&state.db.pool)
            .await?;
        if exists == 0 {
            return Err(AppError::NotFound("Student not found".to_string()));
        }
        project.student_id = student_id;
    }
    if let Some(start_date) = body.start_date {
        project.start_date = start_date;
    }
    if let Some(deadline) = body.deadline {
        project.deadline = deadline;
    }
    if let Some(status) = body.status {
        project.completed_at = progress::completion_timestamp(status, project.completed_at);
        project.status = status;
    }
    if let Some(tags) = body.tags {
        project.tags = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string());
    }

    sqlx::query(
        r#"
        UPDATE projects
        SET title = ?, description = ?, student_id = ?, start_date = ?, deadline = ?,
            status = ?, tags = ?, completed_at = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&project.title)
    .bind(&project.description)
    .bind(&project.student_id)
    .bind(project.start_date)
    .bind(project.deadline)
    .bind(project.status)
    .bind(&project.tags)
    .bind(project.completed_at)
    .bind(Utc::now())
    .bind(&id)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(load_detail(&state.db.pool, &id).await?))
}

async fn delete_project(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    let project = fetch_project(&state.db.pool, &id).await?;
    authz::check_project(&user, ProjectAction::Delete, &project.student_id)?;

    // Milestones and comments go with the project via FK cascade; the roster
    // project list is derived from projects.student_id, so no second write.
    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(()))
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: ProjectStatus,
}

async fn set_project_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<SetStatusRequest>,
) -> Result<Json<ProjectDetailResponse>> {
    let project = fetch_project(&state.db.pool, &id).await?;
    authz::check_project(&user, ProjectAction::SetStatus, &project.student_id)?;

    let completed_at = progress::completion_timestamp(body.status, project.completed_at);

    sqlx::query("UPDATE projects SET status = ?, completed_at = ?, updated_at = ? WHERE id = ?")
        .bind(body.status)
        .bind(completed_at)
        .bind(Utc::now())
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(load_detail(&state.db.pool, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AddMilestoneRequest {
    pub title: String,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
}

async fn add_milestone(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<AddMilestoneRequest>,
) -> Result<Json<ProjectDetailResponse>> {
    let project = fetch_project(&state.db.pool, &id).await?;
    authz::check_project(&user, ProjectAction::AddMilestone, &project.student_id)?;

    if body.title.trim().is_empty() || body.description.trim().is_empty() {
        return Err(AppError::Validation(
            "Please provide title and description".to_string(),
        ));
    }

    let mut tx = state.db.pool.begin().await?;

    let position: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM milestones WHERE project_id = ?",
    )
    .bind(&id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO milestones (id, project_id, position, title, description, due_date, completed, completed_at)
        VALUES (?, ?, ?, ?, ?, ?, 0, NULL)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&id)
    .bind(position)
    .bind(body.title.trim())
    .bind(&body.description)
    .bind(body.due_date)
    .execute(&mut *tx)
    .await?;

    progress::recompute(&mut tx, &id).await?;
    tx.commit().await?;

    Ok(Json(load_detail(&state.db.pool, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMilestoneRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed: Option<bool>,
}

async fn update_milestone(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, milestone_id)): Path<(String, String)>,
    Json(body): Json<UpdateMilestoneRequest>,
) -> Result<Json<ProjectDetailResponse>> {
    let project = fetch_project(&state.db.pool, &id).await?;

    let restricted_fields =
        body.title.is_some() || body.description.is_some() || body.due_date.is_some();
    authz::check_project(
        &user,
        ProjectAction::UpdateMilestone { restricted_fields },
        &project.student_id,
    )?;

    let mut tx = state.db.pool.begin().await?;

    let mut milestone = sqlx::query_as::<_, Milestone>(
        "SELECT * FROM milestones WHERE id = ? AND project_id = ?",
    )
    .bind(&milestone_id)
    .bind(&id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Milestone not found".to_string()))?;

    if let Some(title) = body.title {
        if title.trim().is_empty() {
            return Err(AppError::Validation(
                "Please add a milestone title".to_string(),
            ));
        }
        milestone.title = title.trim().to_string();
    }
    if let Some(description) = body.description {
        if description.trim().is_empty() {
            return Err(AppError::Validation(
                "Please add a milestone description".to_string(),
            ));
        }
        milestone.description = description;
    }
    if let Some(due_date) = body.due_date {
        milestone.due_date = Some(due_date);
    }
    if let Some(completed) = body.completed {
        if completed && !milestone.completed {
            milestone.completed_at = Some(Utc::now());
        } else if !completed {
            milestone.completed_at = None;
        }
        milestone.completed = completed;
    }

    sqlx::query(
        r#"
        UPDATE milestones
        SET title = ?, description = ?, due_date = ?, completed = ?, completed_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&milestone.title)
    .bind(&milestone.description)
    .bind(milestone.due_date)
    .bind(milestone.completed)
    .bind(milestone.completed_at)
    .bind(&milestone.id)
    .execute(&mut *tx)
    .await?;

    progress::recompute(&mut tx, &id).await?;
    tx.commit().await?;

    Ok(Json(load_detail(&state.db.pool, &id).await?))
}

async fn delete_milestone(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, milestone_id)): Path<(String, String)>,
) -> Result<Json<ProjectDetailResponse>> {
    let project = fetch_project(&state.db.pool, &id).await?;
    authz::check_project(&user, ProjectAction::DeleteMilestone, &project.student_id)?;

    let mut tx = state.db.pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM milestones WHERE id = ? AND project_id = ?")
        .bind(&milestone_id)
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::NotFound("Milestone not found".to_string()));
    }

    progress::recompute(&mut tx, &id).await?;
    tx.commit().await?;

    Ok(Json(load_detail(&state.db.pool, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct AddCommentRequest {
    pub text: String,
}

async fn add_comment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<AddCommentRequest>,
) -> Result<Json<ProjectDetailResponse>> {
    let project = fetch_project(&state.db.pool, &id).await?;
    authz::check_project(&user, ProjectAction::AddComment, &project.student_id)?;

    if body.text.trim().is_empty() {
        return Err(AppError::Validation(
            "Please provide comment text".to_string(),
        ));
    }

    // Comments are append-only; author name and role are snapshotted at post
    // time.
    sqlx::query(
        r#"
        INSERT INTO comments (id, project_id, author_id, author_name, author_role, text, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&id)
    .bind(&user.id)
    .bind(&user.name)
    .bind(user.role)
    .bind(body.text.trim())
    .bind(Utc::now())
    .execute(&state.db.pool)
    .await?;

    Ok(Json(load_detail(&state.db.pool, &id).await?))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total: i64,
    pub status_counts: BTreeMap<String, i64>,
}

async fn project_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<StatsResponse>> {
    authz::require_teacher(&user)?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(&state.db.pool)
        .await?;

    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM projects GROUP BY status",
    )
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(StatsResponse {
        total,
        status_counts: rows.into_iter().collect(),
    }))
}
