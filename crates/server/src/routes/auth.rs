use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    db::models::{Role, Student, StudentStatus},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::students::validate_year,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    // Required when role = student
    pub enrollment_number: Option<String>,
    pub roll_number: Option<String>,
    pub department: Option<String>,
    pub year: Option<String>,
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub email: String,
    pub name: String,
    pub role: Role,
    pub exp: usize,
}

pub(crate) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AppError::Internal("Failed to hash password".to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| AppError::Internal("Invalid password hash".to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

fn create_token(user_id: &str, email: &str, name: &str, role: Role, secret: &str) -> Result<String> {
    let expiration = Utc::now()
        .checked_add_signed(chrono::Duration::days(7))
        .ok_or_else(|| AppError::Internal("Failed to compute token expiry".to_string()))?
        .timestamp() as usize;

    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        name: name.to_string(),
        role,
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal("Failed to create token".to_string()))
}

pub(crate) fn validate_credentials(name: &str, email: &str, password: &str) -> Result<()> {
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }
    if name.len() > 50 {
        return Err(AppError::Validation(
            "Name cannot be more than 50 characters".to_string(),
        ));
    }
    if password.len() < 8 {
        return Err(AppError::Validation(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>> {
    validate_credentials(&body.name, &body.email, &body.password)?;

    let password_hash = hash_password(&body.password)?;
    let user_id = Uuid::new_v4().to_string();
    let now = Utc::now();

    // Account and roster profile are created in one transaction so a
    // duplicate enrollment number cannot leave an orphan account behind.
    let mut tx = state.db.pool.begin().await?;

    sqlx::query(
        "INSERT INTO users (id, email, name, password_hash, role, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&user_id)
    .bind(&body.email)
    .bind(&body.name)
    .bind(&password_hash)
    .bind(body.role)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    if body.role == Role::Student {
        let (enrollment, roll, department, year) = match (
            &body.enrollment_number,
            &body.roll_number,
            &body.department,
            &body.year,
        ) {
            (Some(e), Some(r), Some(d), Some(y)) => (e, r, d, y),
            _ => {
                return Err(AppError::Validation(
                    "Please provide all required student fields".to_string(),
                ))
            }
        };
        validate_year(year)?;

        sqlx::query(
            r#"
            INSERT INTO students (id, user_id, name, email, enrollment_number, roll_number,
                                  department, year, phone_number, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&user_id)
        .bind(&body.name)
        .bind(&body.email)
        .bind(enrollment)
        .bind(roll)
        .bind(department)
        .bind(year)
        .bind(&body.phone_number)
        .bind(StudentStatus::Active)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    let token = create_token(
        &user_id,
        &body.email,
        &body.name,
        body.role,
        &state.config.jwt_secret,
    )?;

    Ok(Json(AuthResponse {
        token,
        user: UserResponse {
            id: user_id,
            email: body.email,
            name: body.name,
            role: body.role,
        },
    }))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let user = sqlx::query_as::<_, (String, String, String, String, Role)>(
        "SELECT id, email, name, password_hash, role FROM users WHERE email = ?",
    )
    .bind(&body.email)
    .fetch_optional(&state.db.pool)
    .await?
    .ok_or(AppError::Unauthorized)?;

    let (user_id, email, name, password_hash, role) = user;

    if !verify_password(&body.password, &password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let token = create_token(&user_id, &email, &name, role, &state.config.jwt_secret)?;

    Ok(Json(AuthResponse {
        token,
        user: UserResponse {
            id: user_id,
            email,
            name,
            role,
        },
    }))
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserResponse,
    pub student: Option<Student>,
}

pub async fn me(State(state): State<AppState>, user: AuthUser) -> Result<Json<MeResponse>> {
    let student = match &user.student_id {
        Some(id) => {
            sqlx::query_as::<_, Student>("SELECT * FROM students WHERE id = ?")
                .bind(id)
                .fetch_optional(&state.db.pool)
                .await?
        }
        None => None,
    };

    Ok(Json(MeResponse {
        user: UserResponse {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
        },
        student,
    }))
}
