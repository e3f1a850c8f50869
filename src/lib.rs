extern crate rocket;

pub mod config;
pub mod db;
pub mod models;
pub mod schema;
pub mod services;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::models::{Todo, TodoFilter, UserInfo};
use crate::services::error::ServiceError;
use crate::services::{auth, profile, todos};
use diesel::Connection;
use diesel::sqlite::SqliteConnection;
use log::{error, info, warn};
use rocket::data::Capped;
use rocket::figment::Figment;
use rocket::form::{Form, FromForm};
use rocket::fs::TempFile;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::request::{FlashMessage, FromRequest, Outcome, Request};
use rocket::response::{Flash, Redirect};
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use rocket::{catch, catchers, get, post, routes, Responder, State};

/// Identity resolved from the `session_token` cookie.
pub struct AuthenticatedUser {
    pub user_id: i32,
}

// Why the guard refused, read back by the catchers.
#[derive(Debug, Clone, Copy)]
pub enum AuthError {
    MissingSession,
    InvalidSession,
    NoDatabasePool,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthenticatedUser {
    type Error = (); // Error type is () as we store specific error in local_cache

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let pool = match req.rocket().state::<DbPool>() {
            Some(pool) => pool,
            None => {
                req.local_cache(|| Some(AuthError::NoDatabasePool));
                return Outcome::Forward(Status::InternalServerError);
            }
        };

        let token = match req.cookies().get(auth::SESSION_COOKIE) {
            Some(cookie) if !cookie.value().is_empty() => cookie.value().to_string(),
            _ => {
                req.local_cache(|| Some(AuthError::MissingSession));
                return Outcome::Forward(Status::Unauthorized);
            }
        };

        let lookup = pool
            .get()
            .map_err(ServiceError::from)
            .and_then(|mut conn| auth::session_user(&mut conn, &token));

        match lookup {
            Ok(Some(user_id)) => Outcome::Success(AuthenticatedUser { user_id }),
            Ok(None) => {
                req.local_cache(|| Some(AuthError::InvalidSession));
                Outcome::Forward(Status::Unauthorized)
            }
            Err(err) => {
                error!("event=session_lookup module=web status=error error={}", err);
                Outcome::Forward(Status::InternalServerError)
            }
        }
    }
}

/// Runs `work` inside one transaction on a pooled connection. Any error
/// rolls the transaction back.
pub fn in_transaction<T, F>(pool: &DbPool, work: F) -> Result<T, ServiceError>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T, ServiceError>,
{
    let mut pooled = pool.get()?;
    let conn: &mut SqliteConnection = &mut pooled;
    conn.transaction(work)
}

// --- Page documents ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FlashView {
    pub kind: String,
    pub message: String,
}

impl FlashView {
    fn take(flash: Option<FlashMessage<'_>>) -> Option<Self> {
        flash.map(|f| FlashView {
            kind: f.kind().to_string(),
            message: f.message().to_string(),
        })
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TodoListPage {
    pub flash: Option<FlashView>,
    pub todos: Vec<Todo>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct TodoEditPage {
    pub flash: Option<FlashView>,
    pub todo: Todo,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct AuthPage {
    pub flash: Option<FlashView>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ProfilePage {
    pub flash: Option<FlashView>,
    pub user: UserInfo,
}

fn list_page(flash: Option<FlashMessage<'_>>, todos: Vec<Todo>) -> Json<TodoListPage> {
    Json(TodoListPage {
        flash: FlashView::take(flash),
        todos,
    })
}

// --- Errors ---

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorDetail {
    pub error: String,
}

/// Web-facing failure. User mistakes and "not found" become a flash message
/// on a redirect, like every other outcome; only internal failures surface
/// as a status code.
#[derive(Responder)]
pub enum ApiError {
    #[response(status = 500, content_type = "json")]
    InternalError(Json<ErrorDetail>),
    Redirect(Flash<Redirect>),
}

impl ApiError {
    pub fn from_service(err: ServiceError, target: Redirect) -> Self {
        if err.is_internal() {
            error!("event=request module=web status=error error={}", err);
            ApiError::InternalError(Json(ErrorDetail {
                error: "An unexpected error occurred on the server.".to_string(),
            }))
        } else {
            info!("event=request module=web status=rejected reason={:?}", err);
            ApiError::Redirect(Flash::error(target, err.to_string()))
        }
    }
}

fn to_home(err: ServiceError) -> ApiError {
    ApiError::from_service(err, Redirect::to("/"))
}

fn to_recycle_bin(err: ServiceError) -> ApiError {
    ApiError::from_service(err, Redirect::to("/recycle-bin"))
}

// --- Todo routes ---

#[derive(FromForm, Debug)]
pub struct TodoForm {
    pub title: Option<String>,
    #[field(name = "desc")]
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub priority: Option<String>,
}

impl TodoForm {
    fn validate(&self) -> Result<models::TodoDraft, ServiceError> {
        todos::validate_draft(
            self.title.as_deref(),
            self.description.as_deref(),
            self.due_date.as_deref(),
            self.priority.as_deref(),
        )
    }
}

#[get("/")]
pub fn index(
    pool: &State<DbPool>,
    user: AuthenticatedUser,
    flash: Option<FlashMessage<'_>>,
) -> Result<Json<TodoListPage>, ApiError> {
    let items = in_transaction(pool.inner(), |conn| todos::list_active(conn, user.user_id))
        .map_err(to_home)?;
    Ok(list_page(flash, items))
}

fn create_from_form(pool: &DbPool, user: &AuthenticatedUser, form: &TodoForm) -> Result<Flash<Redirect>, ApiError> {
    let draft = form.validate().map_err(to_home)?;
    let item = in_transaction(pool, |conn| todos::add_todo(conn, user.user_id, &draft)).map_err(to_home)?;
    info!("event=todo_create module=web status=ok user_id={} todo_id={}", user.user_id, item.id);
    Ok(Flash::success(Redirect::to("/"), "Todo added successfully!"))
}

#[post("/", data = "<form>")]
pub fn create_todo(form: Form<TodoForm>, pool: &State<DbPool>, user: AuthenticatedUser) -> Result<Flash<Redirect>, ApiError> {
    create_from_form(pool.inner(), &user, &form)
}

#[post("/add", data = "<form>")]
pub fn add_todo(form: Form<TodoForm>, pool: &State<DbPool>, user: AuthenticatedUser) -> Result<Flash<Redirect>, ApiError> {
    create_from_form(pool.inner(), &user, &form)
}

#[get("/update/<id>")]
pub fn edit_todo_page(
    id: i32,
    pool: &State<DbPool>,
    user: AuthenticatedUser,
    flash: Option<FlashMessage<'_>>,
) -> Result<Json<TodoEditPage>, ApiError> {
    let todo = in_transaction(pool.inner(), |conn| todos::get_todo(conn, user.user_id, id)).map_err(to_home)?;
    Ok(Json(TodoEditPage {
        flash: FlashView::take(flash),
        todo,
    }))
}

#[post("/update/<id>", data = "<form>")]
pub fn update_todo(
    id: i32,
    form: Form<TodoForm>,
    pool: &State<DbPool>,
    user: AuthenticatedUser,
) -> Result<Flash<Redirect>, ApiError> {
    let outcome = form
        .validate()
        .and_then(|draft| in_transaction(pool.inner(), |conn| todos::update_todo(conn, user.user_id, id, &draft)));

    match outcome {
        Ok(_) => Ok(Flash::success(Redirect::to("/"), "Todo updated successfully!")),
        Err(err @ ServiceError::InvalidInput(_)) => {
            Err(ApiError::from_service(err, Redirect::to(format!("/update/{}", id))))
        }
        Err(err) => Err(to_home(err)),
    }
}

#[get("/complete/<id>")]
pub fn complete_todo(id: i32, pool: &State<DbPool>, user: AuthenticatedUser) -> Result<Flash<Redirect>, ApiError> {
    in_transaction(pool.inner(), |conn| todos::complete_todo(conn, user.user_id, id)).map_err(to_home)?;
    Ok(Flash::success(Redirect::to("/"), "Todo marked as completed!"))
}

#[get("/delete/<id>")]
pub fn delete_todo(id: i32, pool: &State<DbPool>, user: AuthenticatedUser) -> Result<Flash<Redirect>, ApiError> {
    in_transaction(pool.inner(), |conn| todos::soft_delete_todo(conn, user.user_id, id)).map_err(to_home)?;
    Ok(Flash::success(Redirect::to("/"), "Todo moved to recycle bin!"))
}

#[get("/recycle-bin")]
pub fn recycle_bin(
    pool: &State<DbPool>,
    user: AuthenticatedUser,
    flash: Option<FlashMessage<'_>>,
) -> Result<Json<TodoListPage>, ApiError> {
    let items = in_transaction(pool.inner(), |conn| todos::list_recycle_bin(conn, user.user_id))
        .map_err(to_home)?;
    Ok(list_page(flash, items))
}

#[get("/restore/<id>")]
pub fn restore_todo(id: i32, pool: &State<DbPool>, user: AuthenticatedUser) -> Result<Flash<Redirect>, ApiError> {
    in_transaction(pool.inner(), |conn| todos::restore_todo(conn, user.user_id, id)).map_err(to_recycle_bin)?;
    Ok(Flash::success(Redirect::to("/recycle-bin"), "Todo restored successfully!"))
}

#[get("/permanent-delete/<id>")]
pub fn permanent_delete_todo(id: i32, pool: &State<DbPool>, user: AuthenticatedUser) -> Result<Flash<Redirect>, ApiError> {
    in_transaction(pool.inner(), |conn| todos::permanently_delete_todo(conn, user.user_id, id))
        .map_err(to_recycle_bin)?;
    info!("event=todo_purge module=web status=ok user_id={} todo_id={}", user.user_id, id);
    Ok(Flash::success(Redirect::to("/recycle-bin"), "Todo permanently deleted!"))
}

#[get("/search?<query>")]
pub fn search_todos(
    query: Option<String>,
    pool: &State<DbPool>,
    user: AuthenticatedUser,
    flash: Option<FlashMessage<'_>>,
) -> Result<Json<TodoListPage>, ApiError> {
    let items = in_transaction(pool.inner(), |conn| todos::search_todos(conn, user.user_id, query.as_deref()))
        .map_err(to_home)?;
    Ok(list_page(flash, items))
}

#[get("/filter?<priority>&<due_date>")]
pub fn filter_todos(
    priority: Option<String>,
    due_date: Option<String>,
    pool: &State<DbPool>,
    user: AuthenticatedUser,
    flash: Option<FlashMessage<'_>>,
) -> Result<Json<TodoListPage>, ApiError> {
    let filter = TodoFilter {
        priority: priority.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
        due_date: todos::parse_due_date(due_date.as_deref()).map_err(to_home)?,
    };
    let items = in_transaction(pool.inner(), |conn| todos::filter_todos(conn, user.user_id, &filter))
        .map_err(to_home)?;
    Ok(list_page(flash, items))
}

fn todo_routes() -> Vec<rocket::Route> {
    routes![
        index,
        create_todo,
        add_todo,
        edit_todo_page,
        update_todo,
        complete_todo,
        delete_todo,
        recycle_bin,
        restore_todo,
        permanent_delete_todo,
        search_todos,
        filter_todos
    ]
}

// --- Identity routes ---

#[derive(FromForm)]
pub struct SignupForm {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

#[derive(FromForm)]
pub struct LoginForm {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[get("/signup")]
pub fn signup_page(flash: Option<FlashMessage<'_>>) -> Json<AuthPage> {
    Json(AuthPage { flash: FlashView::take(flash) })
}

#[post("/signup", data = "<form>")]
pub fn signup(form: Form<SignupForm>, pool: &State<DbPool>, config: &State<AppConfig>) -> Result<Flash<Redirect>, ApiError> {
    let email = form.email.as_deref().unwrap_or_default();
    let password = form.password.as_deref().unwrap_or_default();

    let user = in_transaction(pool.inner(), |conn| {
        auth::register_user(conn, config.bcrypt_cost, email, password, form.name.as_deref())
    })
    .map_err(|err| ApiError::from_service(err, Redirect::to("/signup")))?;

    info!("event=signup module=web status=ok user_id={}", user.id);
    Ok(Flash::success(Redirect::to("/login"), "Account created! Please log in."))
}

#[get("/login")]
pub fn login_page(flash: Option<FlashMessage<'_>>) -> Json<AuthPage> {
    Json(AuthPage { flash: FlashView::take(flash) })
}

#[post("/login", data = "<form>")]
pub fn login(
    form: Form<LoginForm>,
    pool: &State<DbPool>,
    config: &State<AppConfig>,
    cookies: &CookieJar<'_>,
) -> Result<Flash<Redirect>, ApiError> {
    let email = form.email.as_deref().unwrap_or_default();
    let password = form.password.as_deref().unwrap_or_default();

    let (token, user) = in_transaction(pool.inner(), |conn| {
        auth::login_user(conn, email, password, config.session_ttl())
    })
    .map_err(|err| ApiError::from_service(err, Redirect::to("/login")))?;

    cookies.add(
        Cookie::build((auth::SESSION_COOKIE, token))
            .http_only(true)
            .same_site(SameSite::Lax),
    );

    info!("event=login module=web status=ok user_id={}", user.id);
    Ok(Flash::success(Redirect::to("/"), "Logged in successfully!"))
}

#[get("/logout")]
pub fn logout(pool: &State<DbPool>, cookies: &CookieJar<'_>) -> Result<Flash<Redirect>, ApiError> {
    if let Some(cookie) = cookies.get(auth::SESSION_COOKIE) {
        let token = cookie.value().to_string();
        in_transaction(pool.inner(), |conn| auth::logout_user(conn, &token))
            .map_err(|err| ApiError::from_service(err, Redirect::to("/login")))?;
    }
    cookies.remove(Cookie::from(auth::SESSION_COOKIE));
    Ok(Flash::success(Redirect::to("/login"), "You have been logged out."))
}

fn auth_routes() -> Vec<rocket::Route> {
    routes![signup_page, signup, login_page, login, logout]
}

// --- Profile routes ---

#[derive(FromForm)]
pub struct ProfileForm<'r> {
    pub name: Option<String>,
    pub bio: Option<String>,
    // Capped, so a photo over the file limit reaches `store_photo` truncated
    // instead of silently parsing as `None`.
    pub photo: Option<Capped<TempFile<'r>>>,
}

fn to_profile(err: ServiceError) -> ApiError {
    ApiError::from_service(err, Redirect::to("/profile"))
}

#[get("/profile")]
pub fn profile_page(
    pool: &State<DbPool>,
    user: AuthenticatedUser,
    flash: Option<FlashMessage<'_>>,
) -> Result<Json<ProfilePage>, ApiError> {
    let info = in_transaction(pool.inner(), |conn| profile::get_profile(conn, user.user_id)).map_err(to_home)?;
    Ok(Json(ProfilePage {
        flash: FlashView::take(flash),
        user: info,
    }))
}

// Copies an accepted photo into the upload directory and returns its
// stored file name.
async fn store_photo(file: &mut Capped<TempFile<'_>>, owner: i32, config: &AppConfig) -> Result<String, ServiceError> {
    let raw_name = file
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string())
        .unwrap_or_default();
    let extension = profile::photo_extension(&raw_name)?;
    let len = if file.is_complete() { file.len() } else { u64::MAX };
    profile::check_photo_size(len, config.max_upload_bytes)?;

    rocket::tokio::fs::create_dir_all(&config.upload_dir).await?;
    let file_name = profile::photo_file_name(owner, &extension);
    file.copy_to(config.upload_dir.join(&file_name)).await?;
    Ok(file_name)
}

async fn remove_photo(config: &AppConfig, file_name: &str) {
    if let Err(err) = rocket::tokio::fs::remove_file(config.upload_dir.join(file_name)).await {
        warn!("event=photo_cleanup module=web status=error file={} error={}", file_name, err);
    }
}

#[post("/profile", data = "<form>")]
pub async fn update_profile(
    form: Form<ProfileForm<'_>>,
    pool: &State<DbPool>,
    config: &State<AppConfig>,
    user: AuthenticatedUser,
) -> Result<Flash<Redirect>, ApiError> {
    let mut form = form.into_inner();

    let stored_photo = match form.photo.as_mut() {
        Some(file) if file.len() > 0 => Some(store_photo(file, user.user_id, config.inner()).await.map_err(to_profile)?),
        _ => None,
    };

    let outcome = in_transaction(pool.inner(), |conn| {
        let previous = profile::get_profile(conn, user.user_id)?.profile_photo;
        profile::update_profile(
            conn,
            user.user_id,
            form.name.as_deref(),
            form.bio.as_deref(),
            stored_photo.as_deref(),
        )?;
        Ok(previous)
    });

    match outcome {
        // The old file is only unreferenced once the new name has committed.
        Ok(Some(previous)) if stored_photo.is_some() => remove_photo(config.inner(), &previous).await,
        Ok(_) => {}
        Err(err) => {
            if let Some(file_name) = stored_photo {
                remove_photo(config.inner(), &file_name).await;
            }
            return Err(to_profile(err));
        }
    }

    info!("event=profile_update module=web status=ok user_id={}", user.user_id);
    Ok(Flash::success(Redirect::to("/profile"), "Profile updated successfully!"))
}

fn profile_routes() -> Vec<rocket::Route> {
    routes![profile_page, update_profile]
}

// --- Catchers ---

#[catch(401)] // Catches Unauthorized
fn unauthorized_catcher(_status: Status, req: &Request<'_>) -> Flash<Redirect> {
    let message = match req.local_cache(|| None as Option<AuthError>) {
        Some(AuthError::InvalidSession) => "Your session has expired. Please log in again.",
        _ => "Please log in to access this page.",
    };
    Flash::error(Redirect::to("/login"), message)
}

// A profile form Rocket could not parse, usually a body over the
// `data-form` limit, is reported like any other rejected photo.
fn profile_form_rejected(status: Status) -> Flash<Redirect> {
    info!("event=profile_update module=web status=rejected http_status={}", status.code);
    let message = match status {
        s if s == Status::PayloadTooLarge => "Profile photo is too large.",
        _ => "The profile form could not be read.",
    };
    Flash::error(Redirect::to("/profile"), message)
}

#[catch(400)]
fn profile_bad_request_catcher(status: Status, _req: &Request<'_>) -> Flash<Redirect> {
    profile_form_rejected(status)
}

#[catch(413)]
fn profile_too_large_catcher(status: Status, _req: &Request<'_>) -> Flash<Redirect> {
    profile_form_rejected(status)
}

#[catch(422)]
fn profile_unprocessable_catcher(status: Status, _req: &Request<'_>) -> Flash<Redirect> {
    profile_form_rejected(status)
}

#[catch(500)] // Catches Internal Server Error
fn internal_server_error_catcher(_status: Status, req: &Request<'_>) -> Json<ErrorDetail> {
    let error = match req.local_cache(|| None as Option<AuthError>) {
        Some(AuthError::NoDatabasePool) => "Database pool is not available.",
        _ => "An unexpected error occurred on the server.",
    };
    Json(ErrorDetail { error: error.to_string() })
}

/// Overrides only the `file` and `data-form` limits of `base`. Rocket's own
/// limits are twice the accepted photo size; `store_photo` enforces the
/// real one.
pub fn with_upload_limits(base: Figment, config: &AppConfig) -> Figment {
    let file_limit = config.max_upload_bytes.saturating_mul(2);
    base.merge(("limits.file", file_limit))
        .merge(("limits.data-form", file_limit.saturating_add(1024 * 1024)))
}

// This function can be used by main.rs to launch the server
// and by tests to get a Rocket instance.
pub fn rocket_instance(config: AppConfig) -> rocket::Rocket<rocket::Build> {
    let figment = with_upload_limits(rocket::Config::figment(), &config);

    rocket::custom(figment)
        .manage(config)
        .attach(db::stage())
        .mount("/", todo_routes())
        .mount("/", auth_routes())
        .mount("/", profile_routes())
        .register("/", catchers![unauthorized_catcher, internal_server_error_catcher])
        .register(
            "/profile",
            catchers![profile_bad_request_catcher, profile_too_large_catcher, profile_unprocessable_catcher],
        )
}
