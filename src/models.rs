// todo_web/src/models.rs
use crate::schema::{todos, users};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;
use rocket::serde::{Deserialize, Serialize};

#[derive(Queryable, Identifiable, Selectable, Serialize, Debug, PartialEq, Clone)]
#[diesel(table_name = users)]
#[serde(crate = "rocket::serde")]
pub struct User {
    pub id: i32,
    pub email: String,
    #[serde(skip_serializing)] // Password hash should not be sent to client
    pub password_hash: String,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub profile_photo: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub name: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

// For returning user info without password hash
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(crate = "rocket::serde")]
pub struct UserInfo {
    pub id: i32,
    pub email: String,
    pub name: Option<String>,
    pub bio: Option<String>,
    pub profile_photo: Option<String>,
    pub created_at: NaiveDateTime,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        UserInfo {
            id: user.id,
            email: user.email,
            name: user.name,
            bio: user.bio,
            profile_photo: user.profile_photo,
            created_at: user.created_at,
        }
    }
}

/// Profile fields a user may edit. An outer `None` leaves the column alone,
/// `Some(None)` clears it.
#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = users)]
pub struct ProfileChanges<'a> {
    pub name: Option<Option<&'a str>>,
    pub bio: Option<Option<&'a str>>,
    pub profile_photo: Option<&'a str>,
}

impl ProfileChanges<'_> {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.bio.is_none() && self.profile_photo.is_none()
    }
}

#[derive(Queryable, Identifiable, Selectable, Associations, Serialize, Deserialize, Debug, PartialEq, Clone)]
#[diesel(belongs_to(User))]
#[diesel(table_name = todos)]
#[serde(crate = "rocket::serde")]
pub struct Todo {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub description: String,
    pub created_at: NaiveDateTime,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<String>,
    pub completed: bool,
    pub deleted: bool,
}

#[derive(Insertable)]
#[diesel(table_name = todos)]
pub struct NewTodo<'a> {
    pub user_id: i32,
    pub title: &'a str,
    pub description: &'a str,
    pub created_at: NaiveDateTime,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<&'a str>,
}

/// The editable part of a todo. `user_id`, `created_at`, `completed` and
/// `deleted` are never touched by an edit.
#[derive(AsChangeset, Debug)]
#[diesel(table_name = todos)]
#[diesel(treat_none_as_null = true)]
pub struct TodoChanges<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<&'a str>,
}

/// Validated input for creating or editing a todo.
#[derive(Debug, Clone, PartialEq)]
pub struct TodoDraft {
    pub title: String,
    pub description: String,
    pub due_date: Option<NaiveDate>,
    pub priority: Option<String>,
}

/// Exact-match filters over the active list. `None` fields are ignored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TodoFilter {
    pub priority: Option<String>,
    pub due_date: Option<NaiveDate>,
}
