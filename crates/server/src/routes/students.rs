use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::{
    db::models::{ProjectStatus, Role, Student, StudentStatus},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::auth::{hash_password, validate_credentials},
    services::{
        authz,
        query::{self, PageParams, Pagination},
    },
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_students).post(create_student))
        .route("/stats", get(student_stats))
        .route(
            "/:id",
            get(get_student).put(update_student).delete(delete_student),
        )
}

pub(crate) fn validate_year(year: &str) -> Result<()> {
    match year {
        "1" | "2" | "3" | "4" => Ok(()),
        _ => Err(AppError::Validation(
            "Year must be one of 1, 2, 3, 4".to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListStudentsQuery {
    pub status: Option<StudentStatus>,
    pub department: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StudentListResponse {
    pub count: usize,
    pub total: i64,
    pub total_pages: i64,
    pub pagination: Pagination,
    pub data: Vec<Student>,
}

fn sort_column(key: &str) -> Option<&'static str> {
    Some(match key {
        "createdAt" => "created_at",
        "updatedAt" => "updated_at",
        "name" => "name",
        "enrollmentNumber" => "enrollment_number",
        "rollNumber" => "roll_number",
        "department" => "department",
        "year" => "year",
        _ => return None,
    })
}

fn push_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    status: Option<StudentStatus>,
    department: Option<&str>,
    search: Option<&str>,
) {
    if let Some(status) = status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(department) = department {
        qb.push(" AND department = ").push_bind(department.to_string());
    }
    if let Some(search) = search {
        if !search.trim().is_empty() {
            let pattern = query::search_pattern(search.trim());
            qb.push(" AND (LOWER(name) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR LOWER(enrollment_number) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR LOWER(roll_number) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR LOWER(email) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
    }
}

async fn list_students(
    State(state): State<AppState>,
    user: AuthUser,
    Query(q): Query<ListStudentsQuery>,
) -> Result<Json<StudentListResponse>> {
    authz::require_teacher(&user)?;

    let params = PageParams::new(q.page, q.limit)?;
    let (key, dir) = query::split_sort(q.sort.as_deref().unwrap_or("-createdAt"));
    let column = sort_column(key)
        .ok_or_else(|| AppError::Validation(format!("Unknown sort key: {key}")))?;

    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM students WHERE 1 = 1");
    push_filters(&mut count_qb, q.status, q.department.as_deref(), q.search.as_deref());
    let total: i64 = count_qb
        .build_query_scalar()
        .fetch_one(&state.db.pool)
        .await?;

    let mut qb = QueryBuilder::new("SELECT * FROM students WHERE 1 = 1");
    push_filters(&mut qb, q.status, q.department.as_deref(), q.search.as_deref());
    qb.push(format!(" ORDER BY {column} {}, id ASC", dir.sql()));
    qb.push(" LIMIT ")
        .push_bind(params.limit)
        .push(" OFFSET ")
        .push_bind(params.offset());

    let data: Vec<Student> = qb.build_query_as().fetch_all(&state.db.pool).await?;

    Ok(Json(StudentListResponse {
        count: data.len(),
        total,
        total_pages: query::total_pages(total, params.limit),
        pagination: query::paginate(total, &params),
        data,
    }))
}

/// Derived at read time from projects.student_id; the roster stores no
/// project list of its own.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ProjectRef {
    pub id: String,
    pub title: String,
    pub status: ProjectStatus,
    pub progress: i64,
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StudentDetailResponse {
    #[serde(flatten)]
    pub student: Student,
    pub projects: Vec<ProjectRef>,
}

async fn fetch_student(pool: &SqlitePool, id: &str) -> Result<Student> {
    sqlx::query_as::<_, Student>("SELECT * FROM students WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Student not found".to_string()))
}

async fn get_student(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<StudentDetailResponse>> {
    authz::check_student_read(&user, &id)?;
    let student = fetch_student(&state.db.pool, &id).await?;

    let projects = sqlx::query_as::<_, ProjectRef>(
        r#"
        SELECT id, title, status, progress, deadline
        FROM projects WHERE student_id = ?
        ORDER BY created_at DESC, id ASC
        "#,
    )
    .bind(&id)
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(StudentDetailResponse { student, projects }))
}

#[derive(Debug, Deserialize)]
pub struct CreateStudentRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub enrollment_number: String,
    pub roll_number: String,
    pub department: String,
    pub year: String,
    pub phone_number: Option<String>,
    pub status: Option<StudentStatus>,
}

async fn create_student(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateStudentRequest>,
) -> Result<Json<Student>> {
    authz::require_teacher(&user)?;

    validate_credentials(&body.name, &body.email, &body.password)?;
    validate_year(&body.year)?;
    if body.enrollment_number.trim().is_empty() {
        return Err(AppError::Validation(
            "Please add an enrollment number".to_string(),
        ));
    }
    if body.roll_number.trim().is_empty() {
        return Err(AppError::Validation("Please add a roll number".to_string()));
    }
    if body.department.trim().is_empty() {
        return Err(AppError::Validation("Please add a department".to_string()));
    }

    let password_hash = hash_password(&body.password)?;
    let user_id = Uuid::new_v4().to_string();
    let student_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let status = body.status.unwrap_or(StudentStatus::Active);

    // Account and profile in one transaction; unique-index violations on
    // email, enrollment or roll number surface as Conflict with no orphan
    // rows left behind.
    let mut tx = state.db.pool.begin().await?;

    sqlx::query(
        "INSERT INTO users (id, email, name, password_hash, role, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&user_id)
    .bind(&body.email)
    .bind(&body.name)
    .bind(&password_hash)
    .bind(Role::Student)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO students (id, user_id, name, email, enrollment_number, roll_number,
                              department, year, phone_number, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&student_id)
    .bind(&user_id)
    .bind(&body.name)
    .bind(&body.email)
    .bind(body.enrollment_number.trim())
    .bind(body.roll_number.trim())
    .bind(body.department.trim())
    .bind(&body.year)
    .bind(&body.phone_number)
    .bind(status)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(fetch_student(&state.db.pool, &student_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStudentRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub enrollment_number: Option<String>,
    pub roll_number: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub phone_number: Option<String>,
    pub status: Option<StudentStatus>,
}

async fn update_student(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateStudentRequest>,
) -> Result<Json<Student>> {
    authz::require_teacher(&user)?;

    let mut student = fetch_student(&state.db.pool, &id).await?;

    if let Some(name) = body.name {
        if name.trim().is_empty() {
            return Err(AppError::Validation("Please add a name".to_string()));
        }
        student.name = name.trim().to_string();
    }
    if let Some(email) = body.email {
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::Validation("Invalid email address".to_string()));
        }
        student.email = email;
    }
    if let Some(enrollment) = body.enrollment_number {
        if enrollment.trim().is_empty() {
            return Err(AppError::Validation(
                "Please add an enrollment number".to_string(),
            ));
        }
        student.enrollment_number = enrollment.trim().to_string();
    }
    if let Some(roll) = body.roll_number {
        if roll.trim().is_empty() {
            return Err(AppError::Validation("Please add a roll number".to_string()));
        }
        student.roll_number = roll.trim().to_string();
    }
    if let Some(department) = body.department {
        student.department = department;
    }
    if let Some(year) = body.year {
        validate_year(&year)?;
        student.year = year;
    }
    if let Some(phone) = body.phone_number {
        student.phone_number = Some(phone);
    }
    if let Some(status) = body.status {
        student.status = status;
    }

    // Renames race through to the unique indexes, which are authoritative.
    sqlx::query(
        r#"
        UPDATE students
        SET name = ?, email = ?, enrollment_number = ?, roll_number = ?,
            department = ?, year = ?, phone_number = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&student.name)
    .bind(&student.email)
    .bind(&student.enrollment_number)
    .bind(&student.roll_number)
    .bind(&student.department)
    .bind(&student.year)
    .bind(&student.phone_number)
    .bind(student.status)
    .bind(Utc::now())
    .bind(&id)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(fetch_student(&state.db.pool, &id).await?))
}

async fn delete_student(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    authz::require_teacher(&user)?;

    // FK cascade removes the student's projects, and each project's cascade
    // removes its milestones and comments.
    let deleted = sqlx::query("DELETE FROM students WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::NotFound("Student not found".to_string()));
    }

    Ok(Json(()))
}

#[derive(Debug, Serialize)]
pub struct StudentStatsResponse {
    pub total: i64,
    pub status_counts: BTreeMap<String, i64>,
}

async fn student_stats(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<StudentStatsResponse>> {
    authz::require_teacher(&user)?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM students")
        .fetch_one(&state.db.pool)
        .await?;

    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM students GROUP BY status",
    )
    .fetch_all(&state.db.pool)
    .await?;

    Ok(Json(StudentStatsResponse {
        total,
        status_counts: rows.into_iter().collect(),
    }))
}
