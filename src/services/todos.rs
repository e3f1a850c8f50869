//! Item store: every todo operation, scoped to the owning user.
//!
//! Each function filters on `user_id = owner`, so a todo that belongs to
//! another user is reported exactly like a todo that does not exist.

use crate::models::{NewTodo, Todo, TodoChanges, TodoDraft, TodoFilter};
use crate::schema::todos;
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use super::error::ServiceError;

pub const MAX_TITLE_CHARS: usize = 200;
pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const MAX_PRIORITY_CHARS: usize = 50;
pub const DUE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses an optional `YYYY-MM-DD` form value. Blank means "no date".
pub fn parse_due_date(raw: Option<&str>) -> Result<Option<NaiveDate>, ServiceError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) => NaiveDate::parse_from_str(value, DUE_DATE_FORMAT)
            .map(Some)
            .map_err(|_| ServiceError::InvalidInput(format!("Error: Invalid due date `{}`, expected YYYY-MM-DD.", value))),
        None => Ok(None),
    }
}

fn blank_to_none(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Checks the raw form values of a create or edit request.
pub fn validate_draft(
    title: Option<&str>,
    description: Option<&str>,
    due_date: Option<&str>,
    priority: Option<&str>,
) -> Result<TodoDraft, ServiceError> {
    let (title, description) = match (blank_to_none(title), blank_to_none(description)) {
        (Some(t), Some(d)) => (t, d),
        _ => {
            return Err(ServiceError::InvalidInput(
                "Error: Title and Description cannot be empty. Please fill in both fields.".to_string(),
            ))
        }
    };

    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ServiceError::InvalidInput(format!("Error: Title is limited to {} characters.", MAX_TITLE_CHARS)));
    }
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(ServiceError::InvalidInput(format!("Error: Description is limited to {} characters.", MAX_DESCRIPTION_CHARS)));
    }

    let priority = blank_to_none(priority);
    if priority.as_ref().map_or(false, |p| p.chars().count() > MAX_PRIORITY_CHARS) {
        return Err(ServiceError::InvalidInput(format!("Error: Priority is limited to {} characters.", MAX_PRIORITY_CHARS)));
    }

    Ok(TodoDraft {
        title,
        description,
        due_date: parse_due_date(due_date)?,
        priority,
    })
}

pub fn add_todo(
    conn: &mut SqliteConnection,
    owner: i32,
    draft: &TodoDraft,
) -> Result<Todo, ServiceError> {
    let new_item = NewTodo {
        user_id: owner,
        title: &draft.title,
        description: &draft.description,
        created_at: Utc::now().naive_utc(),
        due_date: draft.due_date,
        priority: draft.priority.as_deref(),
    };

    let item = diesel::insert_into(todos::table)
        .values(&new_item)
        .returning(Todo::as_returning())
        .get_result(conn)?;
    Ok(item)
}

pub fn get_todo(
    conn: &mut SqliteConnection,
    owner: i32,
    todo_id: i32,
) -> Result<Todo, ServiceError> {
    use crate::schema::todos::dsl::*;

    todos
        .filter(id.eq(todo_id).and(user_id.eq(owner)))
        .select(Todo::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(ServiceError::todo_not_found)
}

/// Active todos of `owner`, oldest first.
pub fn list_active(conn: &mut SqliteConnection, owner: i32) -> Result<Vec<Todo>, ServiceError> {
    list_by_deleted(conn, owner, false)
}

/// Soft-deleted todos of `owner`, oldest first.
pub fn list_recycle_bin(conn: &mut SqliteConnection, owner: i32) -> Result<Vec<Todo>, ServiceError> {
    list_by_deleted(conn, owner, true)
}

fn list_by_deleted(
    conn: &mut SqliteConnection,
    owner: i32,
    in_bin: bool,
) -> Result<Vec<Todo>, ServiceError> {
    use crate::schema::todos::dsl::*;

    let items = todos
        .filter(user_id.eq(owner).and(deleted.eq(in_bin)))
        .order(id.asc())
        .select(Todo::as_select())
        .load(conn)?;
    Ok(items)
}

pub fn update_todo(
    conn: &mut SqliteConnection,
    owner: i32,
    todo_id: i32,
    draft: &TodoDraft,
) -> Result<Todo, ServiceError> {
    use crate::schema::todos::dsl::*;

    let changes = TodoChanges {
        title: &draft.title,
        description: &draft.description,
        due_date: draft.due_date,
        priority: draft.priority.as_deref(),
    };

    diesel::update(todos.filter(id.eq(todo_id).and(user_id.eq(owner))))
        .set(&changes)
        .returning(Todo::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or_else(ServiceError::todo_not_found)
}

pub fn complete_todo(conn: &mut SqliteConnection, owner: i32, todo_id: i32) -> Result<Todo, ServiceError> {
    use crate::schema::todos::dsl::*;

    diesel::update(todos.filter(id.eq(todo_id).and(user_id.eq(owner))))
        .set(completed.eq(true))
        .returning(Todo::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or_else(ServiceError::todo_not_found)
}

/// Moves a todo to the recycle bin.
pub fn soft_delete_todo(conn: &mut SqliteConnection, owner: i32, todo_id: i32) -> Result<Todo, ServiceError> {
    set_deleted(conn, owner, todo_id, true)
}

/// Brings a todo back from the recycle bin.
pub fn restore_todo(conn: &mut SqliteConnection, owner: i32, todo_id: i32) -> Result<Todo, ServiceError> {
    set_deleted(conn, owner, todo_id, false)
}

fn set_deleted(
    conn: &mut SqliteConnection,
    owner: i32,
    todo_id: i32,
    in_bin: bool,
) -> Result<Todo, ServiceError> {
    use crate::schema::todos::dsl::*;

    diesel::update(todos.filter(id.eq(todo_id).and(user_id.eq(owner))))
        .set(deleted.eq(in_bin))
        .returning(Todo::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or_else(ServiceError::todo_not_found)
}

/// Removes a todo for good. Only todos already in the recycle bin qualify;
/// an active todo has to be soft-deleted first.
pub fn permanently_delete_todo(conn: &mut SqliteConnection, owner: i32, todo_id: i32) -> Result<(), ServiceError> {
    use crate::schema::todos::dsl::*;

    let removed = diesel::delete(
        todos.filter(id.eq(todo_id).and(user_id.eq(owner)).and(deleted.eq(true))),
    )
    .execute(conn)?;

    match removed {
        0 => Err(ServiceError::NotFound("Todo not found in the recycle bin.".to_string())),
        _ => Ok(()),
    }
}

/// Case-insensitive substring search over title and description of the
/// active todos. A blank query returns the whole active list.
pub fn search_todos(
    conn: &mut SqliteConnection,
    owner: i32,
    query: Option<&str>,
) -> Result<Vec<Todo>, ServiceError> {
    use crate::schema::todos::dsl::*;

    let mut boxed = todos
        .filter(user_id.eq(owner).and(deleted.eq(false)))
        .into_boxed();

    if let Some(term) = query.map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(term));
        boxed = boxed.filter(
            title
                .like(pattern.clone())
                .escape('\\')
                .or(description.like(pattern).escape('\\')),
        );
    }

    let items = boxed
        .order(id.asc())
        .select(Todo::as_select())
        .load(conn)?;
    Ok(items)
}

pub fn filter_todos(
    conn: &mut SqliteConnection,
    owner: i32,
    filter: &TodoFilter,
) -> Result<Vec<Todo>, ServiceError> {
    use crate::schema::todos::dsl::*;

    let mut boxed = todos
        .filter(user_id.eq(owner).and(deleted.eq(false)))
        .into_boxed();

    if let Some(ref wanted) = filter.priority {
        boxed = boxed.filter(priority.eq(wanted.clone()));
    }
    if let Some(wanted) = filter.due_date {
        boxed = boxed.filter(due_date.eq(wanted));
    }

    let items = boxed
        .order(id.asc())
        .select(Todo::as_select())
        .load(conn)?;
    Ok(items)
}

// SQLite LIKE is ASCII case-insensitive; `%` and `_` must match literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
