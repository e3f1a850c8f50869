use crate::models::{NewUser, User, UserInfo};
use crate::schema::{sessions, users};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sqlite::SqliteConnection;
use uuid::Uuid;
use bcrypt::{hash, verify};
use chrono::{Duration, NaiveDateTime, Utc};
use validator::ValidateEmail;
use super::error::ServiceError;

pub const SESSION_COOKIE: &str = "session_token";
pub const MAX_EMAIL_CHARS: usize = 100;

const INVALID_CREDENTIALS: &str = "Invalid email or password.";
const EMAIL_TAKEN: &str = "Email address already registered.";

/// Trims and lower-cases an email so lookups are case-insensitive.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn register_user(
    conn: &mut SqliteConnection,
    bcrypt_cost: u32,
    raw_email: &str,
    password: &str,
    display_name: Option<&str>,
) -> Result<UserInfo, ServiceError> {
    let email = normalize_email(raw_email);
    if email.is_empty() || password.is_empty() {
        return Err(ServiceError::InvalidInput("Email and password are required.".to_string()));
    }
    if email.chars().count() > MAX_EMAIL_CHARS || !email.validate_email() {
        return Err(ServiceError::InvalidInput("Please enter a valid email address.".to_string()));
    }

    let existing_user = users::table
        .filter(users::email.eq(&email))
        .select(User::as_select())
        .first::<User>(conn)
        .optional()?;

    if existing_user.is_some() {
        return Err(ServiceError::Conflict(EMAIL_TAKEN.to_string()));
    }

    let hashed_password = hash(password, bcrypt_cost)?;

    let new_user = NewUser {
        email: &email,
        password_hash: &hashed_password,
        name: display_name.map(str::trim).filter(|n| !n.is_empty()),
        created_at: Utc::now().naive_utc(),
    };

    // A concurrent signup can still win the race past the lookup above.
    let user = diesel::insert_into(users::table)
        .values(&new_user)
        .returning(User::as_returning())
        .get_result(conn)
        .map_err(|err| match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                ServiceError::Conflict(EMAIL_TAKEN.to_string())
            }
            other => ServiceError::from(other),
        })?;

    Ok(user.into())
}

/// Verifies credentials and opens a session. Returns the session token.
///
/// Unknown emails and wrong passwords fail with the same message.
pub fn login_user(
    conn: &mut SqliteConnection,
    raw_email: &str,
    password: &str,
    ttl: Duration,
) -> Result<(String, UserInfo), ServiceError> {
    let email = normalize_email(raw_email);

    let found_user = users::table
        .filter(users::email.eq(&email))
        .select(User::as_select())
        .first::<User>(conn)
        .optional()?;

    let user = match found_user {
        Some(user) if verify(password, &user.password_hash)? => user,
        _ => return Err(ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string())),
    };

    let now = Utc::now().naive_utc();
    let expires_at = now
        .checked_add_signed(ttl)
        .ok_or_else(|| ServiceError::InternalError("session lifetime out of range".to_string()))?;

    purge_expired_sessions(conn, now)?;

    let new_session = NewSession {
        id: Uuid::new_v4().to_string(),
        user_id: user.id,
        created_at: now,
        expires_at,
    };

    let session = diesel::insert_into(sessions::table)
        .values(&new_session)
        .returning(Session::as_returning())
        .get_result(conn)?;

    Ok((session.id, user.into()))
}

/// Resolves a session token to its user id. Expired or unknown tokens
/// resolve to `None`.
pub fn session_user(conn: &mut SqliteConnection, token: &str) -> Result<Option<i32>, ServiceError> {
    if Uuid::parse_str(token).is_err() {
        return Ok(None);
    }

    let now = Utc::now().naive_utc();
    let owner = sessions::table
        .filter(sessions::id.eq(token).and(sessions::expires_at.gt(now)))
        .select(sessions::user_id)
        .first::<i32>(conn)
        .optional()?;
    Ok(owner)
}

/// Drops every session that expired at or before `now`.
pub fn purge_expired_sessions(conn: &mut SqliteConnection, now: NaiveDateTime) -> Result<usize, ServiceError> {
    let removed = diesel::delete(sessions::table.filter(sessions::expires_at.le(now)))
        .execute(conn)?;
    Ok(removed)
}

/// Ends a session. Unknown tokens are ignored.
pub fn logout_user(conn: &mut SqliteConnection, token: &str) -> Result<(), ServiceError> {
    diesel::delete(sessions::table.filter(sessions::id.eq(token)))
        .execute(conn)?;
    Ok(())
}

#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = sessions)]
pub struct Session {
    pub id: String,
    pub user_id: i32,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession {
    pub id: String,
    pub user_id: i32,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn unrepresentable_session_lifetime_is_an_error() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        crate::db::run_migrations(&mut conn).unwrap();
        register_user(&mut conn, 4, "ttl@example.com", "secret", None).unwrap();

        let err = login_user(&mut conn, "ttl@example.com", "secret", Duration::MAX).unwrap_err();
        assert!(err.is_internal());
        let rows: i64 = sessions::table.count().get_result(&mut conn).unwrap();
        assert_eq!(rows, 0);
    }
}
