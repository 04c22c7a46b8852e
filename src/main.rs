pub mod auth;
pub mod charts;
pub mod cms;
pub mod config;
pub mod courses;
pub mod duplicates;
pub mod err;
pub mod export;
pub mod filter;
pub mod models;
pub mod repo;
pub mod staff;
pub mod subscribe;
pub mod user;

use std::sync::Arc;

use axum::handler::Handler;
use axum::{routing::get, routing::post, Extension, Json, Router};
use serde::Serialize;

use crate::config::Config;
use crate::err::{Error, Fine, Success};
use crate::repo::{LocalRepository, PgRepository, Repo};

pub type Payload<T> = axum::response::Result<Json<Success<T>>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Json(Fine(value)))
}

pub fn app(repo: Repo, config: Config) -> Router {
    Router::new()
        .route("/courses", get(courses::course_list))
        .route(
            "/courses/filter/:subscription_type/:style",
            get(courses::course_list_filtered),
        )
        .route("/courses/preview", get(courses::course_list_preview))
        .route("/courses/archive", get(courses::archive))
        .route("/offering/:id", get(courses::offering_by_id))
        .route("/course/:id", get(courses::course_detail))
        .route(
            "/course/:id/subscribe",
            get(subscribe::subscribe_form).post(subscribe::subscribe_submit),
        )
        .route("/user/courses", get(user::user_courses))
        .route(
            "/user/profile",
            get(user::user_profile).post(user::edit_profile),
        )
        .route("/user/password", post(user::change_password))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/staff/confirmations", get(staff::confirmation_check))
        .route(
            "/staff/duplicate-users",
            get(staff::duplicate_users).post(staff::duplicate_users_post),
        )
        .route("/staff/teachers", get(staff::teachers))
        .route("/staff/subscriptions", get(staff::subscription_overview))
        .route("/staff/offerings/:id", get(staff::offering_overview))
        .route("/staff/export/summary.csv", get(staff::export_summary_csv))
        .route("/staff/export/summary.xlsx", get(staff::export_summary_xlsx))
        .route(
            "/staff/export/offerings/:id/summary.csv",
            get(staff::export_offering_summary_csv),
        )
        .route(
            "/staff/export/offerings/:id/summary.xlsx",
            get(staff::export_offering_summary_xlsx),
        )
        .route("/cms/plugins/:id", get(cms::plugin))
        .route("/cms/placeholders/:id", get(cms::placeholder))
        .fallback(err::handler404.into_service())
        .layer(Extension(repo))
        .layer(Extension(config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::from_env()?;

    let repo: Repo = match &config.database_url {
        Some(url) => Arc::new(
            PgRepository::connect(url, config.db_max_connections).await?,
        ),
        None => {
            log::warn!("DATABASE_URL is not set, all data is kept in memory");
            Arc::new(LocalRepository::new())
        }
    };

    let addr = config.bind;
    let app = app(repo, config);
    log::info!("Starting tq-server HTTP Server on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::hash_password;
    use crate::models::fixtures::*;
    use crate::models::StaffSession;
    use crate::repo::Repository;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn setup() -> (LocalRepository, Router) {
        let local = LocalRepository::new();
        local.insert_offering(offering(1, "Spring")).await;
        local.insert_course(course(10, 1, "Salsa", Vec::new())).await;

        let mut student = user(1, "Anna", "Muster", "anna@example.com");
        student.password_hash = hash_password("secret password").unwrap();
        local.insert_user(student).await;
        let mut staff = user(2, "Sam", "Staff", "sam@example.com");
        staff.is_staff = true;
        local.insert_user(staff).await;

        for (ssid, user_id) in [("student-session", 1), ("staff-session", 2)] {
            local
                .create_session(&StaffSession {
                    ssid: ssid.to_string(),
                    belongs_to: user_id,
                    expires_at: Utc::now() + Duration::hours(1),
                })
                .await
                .unwrap();
        }

        let repo: Repo = Arc::new(local.clone());
        (local, app(repo, Config::default()))
    }

    fn get(uri: &str, ssid: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(ssid) = ssid {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", ssid));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, ssid: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(ssid) = ssid {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", ssid));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn course_list_is_public() {
        let (_, app) = setup().await;
        let response = app.oneshot(get("/courses", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["offerings"][0]["offering"]["name"], "Spring");
    }

    #[tokio::test]
    async fn unknown_paths_are_tagged_not_found() {
        let (_, app) = setup().await;
        let response = app.oneshot(get("/nowhere", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "NotFound");
    }

    #[tokio::test]
    async fn staff_pages_check_the_session() {
        let (_, app) = setup().await;
        let anonymous = app
            .clone()
            .oneshot(get("/staff/confirmations", None))
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let student = app
            .clone()
            .oneshot(get("/staff/confirmations", Some("student-session")))
            .await
            .unwrap();
        assert_eq!(student.status(), StatusCode::FORBIDDEN);

        let staff = app
            .oneshot(get("/staff/confirmations", Some("staff-session")))
            .await
            .unwrap();
        assert_eq!(staff.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn expired_sessions_are_dropped() {
        let (local, app) = setup().await;
        local
            .create_session(&StaffSession {
                ssid: "old-session".to_string(),
                belongs_to: 1,
                expires_at: Utc::now() - Duration::minutes(1),
            })
            .await
            .unwrap();
        let response = app
            .oneshot(get("/user/profile", Some("old-session")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(local.session("old-session").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn login_opens_a_session() {
        let (_, app) = setup().await;
        let wrong = app
            .clone()
            .oneshot(post_json(
                "/auth/login",
                None,
                json!({"username": "user1", "password": "guess"}),
            ))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(post_json(
                "/auth/login",
                None,
                json!({"username": "user1", "password": "secret password"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let ssid = body["session_id"].as_str().unwrap().to_string();

        let profile = app.oneshot(get("/user/profile", Some(&ssid))).await.unwrap();
        assert_eq!(profile.status(), StatusCode::OK);
        let profile = json_body(profile).await;
        assert_eq!(profile["user"]["email"], "anna@example.com");
        assert!(profile["user"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn subscribing_through_the_router() {
        let (local, app) = setup().await;
        let response = app
            .oneshot(post_json(
                "/course/10/subscribe",
                Some("student-session"),
                json!({"comment": "first time"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["outcome"], "subscribed");
        assert_eq!(local.subscriptions_of_user(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_subscription_redirects_to_the_course() {
        let (_, app) = setup().await;
        let first = app
            .clone()
            .oneshot(post_json(
                "/course/10/subscribe",
                Some("student-session"),
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(first).await["outcome"], "subscribed");

        let again = app
            .clone()
            .oneshot(get("/course/10/subscribe", Some("student-session")))
            .await
            .unwrap();
        let body = json_body(again).await;
        assert_eq!(body["outcome"], "redirect");
        let to = body["to"].as_str().unwrap().to_string();

        let target = app.oneshot(get(&to, None)).await.unwrap();
        assert_eq!(target.status(), StatusCode::OK);
        assert_eq!(json_body(target).await["course"]["id"], 10);
    }

    #[tokio::test]
    async fn summary_downloads_as_csv() {
        let (_, app) = setup().await;
        let response = app
            .oneshot(get("/staff/export/summary.csv", Some("staff-session")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("Offering,Course,"));
        assert!(text.contains("Spring,Salsa,0,0,0,0,0,"));
    }
}
