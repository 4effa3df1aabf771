mod admin;
mod appointments;
pub mod audit;
pub mod auth;
mod chat;
pub mod error;
mod posts;
mod profiles;
mod ratings;
pub mod rate_limit;
mod session;
mod therapists;
mod uploads;
mod validation;
mod ws;

use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{HeaderName, AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::AppState;

/// Multipart framing on top of the largest accepted object
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Signup and login (public, stricter rate limit)
    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // WebSocket routes (auth handled in handlers via query param)
    let ws_routes = Router::new().route("/chat/rooms/:id/stream", get(ws::chat_stream_ws));

    // Protected API routes
    let api_routes = Router::new()
        // Session
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        // Profiles
        .route("/profiles/me", put(profiles::update_my_profile))
        .route("/profiles/me/avatar", post(profiles::upload_avatar))
        .route("/profiles/me/certificate", post(profiles::upload_certificate))
        .route("/profiles/:id", get(profiles::get_profile))
        .route("/profiles/:id/posts", get(posts::list_user_posts))
        // Therapist directory and ratings
        .route("/therapists", get(therapists::search_therapists))
        .route(
            "/therapists/:id/ratings",
            get(ratings::list_ratings).post(ratings::submit_rating),
        )
        // Appointments
        .route(
            "/appointments",
            get(appointments::list_appointments).post(appointments::create_appointment),
        )
        .route("/appointments/:id/status", put(appointments::update_status))
        // Chat
        .route("/chat/rooms", get(chat::list_rooms).post(chat::open_chat_room))
        .route(
            "/chat/rooms/:id/messages",
            get(chat::list_messages).post(chat::send_message),
        )
        .route("/chat/rooms/:id/read", post(chat::mark_room_read))
        // Feed
        .route("/posts", get(posts::list_feed).post(posts::create_post))
        .route("/posts/:id", put(posts::update_post).delete(posts::delete_post))
        .route("/posts/:id/like", post(posts::like_post).delete(posts::unlike_post))
        .route(
            "/posts/:id/comments",
            get(posts::list_comments).post(posts::create_comment),
        )
        .route("/uploads/image", post(uploads::upload_image))
        // Admin
        .route("/admin/therapists", get(admin::list_therapists))
        .route(
            "/admin/therapists/:id/verification",
            put(admin::set_verification),
        )
        .route("/admin/stats", get(admin::stats))
        .route("/admin/audit-logs", get(audit::list_logs))
        // Protected by auth
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ))
        // Merge WS routes (they handle their own auth)
        .merge(ws_routes);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, HeaderName::from_static("x-api-key")]);

    let body_limit = state.config.storage.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/session/route", get(session::resolve_route))
        .nest("/api/auth", auth_routes)
        .nest("/api", api_routes)
        .nest_service("/storage", ServeDir::new(state.config.storage_dir()))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::test_pool;
    use crate::storage::LocalBlobStore;
    use axum::{body::Body, http::Request, http::StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        state: Arc<AppState>,
        _storage: TempDir,
    }

    async fn test_app() -> TestApp {
        let storage = TempDir::new().unwrap();
        let mut config = Config::default();
        config.server.data_dir = storage.path().to_path_buf();
        config.auth.admin_email = Some("admin@example.com".into());
        config.auth.admin_password = Some("admin-secret".into());

        let db = test_pool().await;
        auth::ensure_admin_user(&db, &config).await.unwrap();

        let blobs = Arc::new(LocalBlobStore::new(
            config.storage_dir(),
            &config.server.public_base_url,
            config.storage.max_upload_bytes,
        ));
        let state = Arc::new(AppState::with_storage(config, db, blobs));
        TestApp {
            router: create_router(state.clone()),
            state,
            _storage: storage,
        }
    }

    impl TestApp {
        async fn call(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("Authorization", format!("Bearer {}", token));
            }
            let request = match body {
                Some(body) => builder
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, value)
        }

        /// Sign up and return (token, profile id)
        async fn signup(&self, body: Value) -> (String, String) {
            let (status, value) = self.call("POST", "/api/auth/signup", None, Some(body)).await;
            assert_eq!(status, StatusCode::CREATED, "{}", value);
            (
                value["token"].as_str().unwrap().to_string(),
                value["profile"]["id"].as_str().unwrap().to_string(),
            )
        }

        /// POST a single-file multipart body
        async fn upload(&self, uri: &str, token: &str, file_name: &str, data: &[u8]) -> (StatusCode, Value) {
            let boundary = "tenfis-test-boundary";
            let mut body = format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                b = boundary,
                f = file_name
            )
            .into_bytes();
            body.extend_from_slice(data);
            body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

            let request = Request::builder()
                .method("POST")
                .uri(uri)
                .header("Authorization", format!("Bearer {}", token))
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap();
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
        }

        async fn count(&self, table: &str) -> i64 {
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.state.db)
                .await
                .unwrap()
        }

        async fn login(&self, email: &str, password: &str) -> String {
            let (status, value) = self
                .call(
                    "POST",
                    "/api/auth/login",
                    None,
                    Some(json!({ "email": email, "password": password })),
                )
                .await;
            assert_eq!(status, StatusCode::OK, "{}", value);
            value["token"].as_str().unwrap().to_string()
        }
    }

    fn patient_signup(email: &str) -> Value {
        json!({
            "email": email,
            "password": "secret1",
            "role": "patient",
            "full_name": "Amina Patient",
            "phone": "0555123456",
            "dob": "1990-04-12",
            "allergies": "none"
        })
    }

    fn therapist_signup(email: &str) -> Value {
        json!({
            "email": email,
            "password": "secret1",
            "role": "psychologue",
            "full_name": "Karim Therapist",
            "phone": "0555987654",
            "dob": "1980-02-03",
            "bio": "CBT for anxiety",
            "rate": 3000.0,
            "specialties": ["Anxiety", "Depression"],
            "license_number": "LIC-42",
            "years_of_experience": 9
        })
    }

    fn future_date() -> String {
        (chrono::Utc::now() + chrono::Duration::days(3)).to_rfc3339()
    }

    /// Patient, verified therapist and admin tokens plus the two profile ids
    async fn verified_pair(app: &TestApp) -> (String, String, String, String, String) {
        let (patient, patient_id) = app.signup(patient_signup("pat@example.com")).await;
        let (therapist, therapist_id) = app.signup(therapist_signup("doc@example.com")).await;
        let admin = app.login("admin@example.com", "admin-secret").await;

        let (status, body) = app
            .call(
                "PUT",
                &format!("/api/admin/therapists/{}/verification", therapist_id),
                Some(&admin),
                Some(json!({ "is_verified": true })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["is_verified"], true);

        (patient, patient_id, therapist, therapist_id, admin)
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app().await;
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_api_key_header() {
        let app = test_app().await;
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/posts")
            .header("Origin", "https://app.example.com")
            .header("Access-Control-Request-Method", "GET")
            .header("Access-Control-Request-Headers", "x-api-key")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        let allowed = response
            .headers()
            .get("access-control-allow-headers")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        assert!(allowed.contains("x-api-key"), "{}", allowed);
        assert!(allowed.contains("authorization"), "{}", allowed);
    }

    #[tokio::test]
    async fn test_protected_routes_require_session() {
        let app = test_app().await;
        let (status, body) = app.call("GET", "/api/posts", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");

        let (status, _) = app.call("GET", "/api/posts", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_signup_validation_and_duplicates() {
        let app = test_app().await;
        let mut bad = patient_signup("not-an-email");
        bad["phone"] = json!("12ab");
        let (status, body) = app.call("POST", "/api/auth/signup", None, Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "validation_error");
        assert!(body["error"]["details"]["email"].is_array());
        assert!(body["error"]["details"]["phone"].is_array());

        app.signup(patient_signup("dup@example.com")).await;
        let (status, _) = app
            .call("POST", "/api/auth/signup", None, Some(patient_signup("DUP@example.com")))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_me_reports_capabilities_and_landing() {
        let app = test_app().await;
        let (token, _) = app.signup(therapist_signup("pending@example.com")).await;

        let (status, body) = app.call("GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["restricted"], true);
        assert_eq!(body["landing"], "/psychologue/Mainps");
        let capabilities = body["capabilities"].as_array().unwrap();
        assert!(capabilities.contains(&json!("browse_feed")));
        assert!(!capabilities.contains(&json!("create_post")));
    }

    #[tokio::test]
    async fn test_pending_therapist_is_restricted() {
        let app = test_app().await;
        let (token, _) = app.signup(therapist_signup("pending@example.com")).await;

        let (status, body) = app
            .call("POST", "/api/posts", Some(&token), Some(json!({ "content": "Hello" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["details"]["reason"], "pending_verification");
        assert_eq!(body["error"]["details"]["capability"], "create_post");

        let (status, _) = app
            .call("PUT", "/api/profiles/me", Some(&token), Some(json!({ "bio": "x" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.call("GET", "/api/posts", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unverified_therapist_is_hidden_and_unbookable() {
        let app = test_app().await;
        let (patient, _) = app.signup(patient_signup("pat@example.com")).await;
        let (_, therapist_id) = app.signup(therapist_signup("doc@example.com")).await;

        let (status, body) = app.call("GET", "/api/therapists", Some(&patient), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 0);

        let (status, _) = app
            .call(
                "POST",
                "/api/appointments",
                Some(&patient),
                Some(json!({ "therapist_id": therapist_id, "requested_date": future_date() })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_booking_chat_and_rating_flow() {
        let app = test_app().await;
        let (patient, patient_id, therapist, therapist_id, admin) = verified_pair(&app).await;

        let (status, body) = app
            .call("GET", "/api/therapists?specialties=anxiety", Some(&patient), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], therapist_id.as_str());

        let (status, appointment) = app
            .call(
                "POST",
                "/api/appointments",
                Some(&patient),
                Some(json!({
                    "therapist_id": therapist_id,
                    "requested_date": future_date(),
                    "duration_minutes": 90,
                    "notes": "  first session  "
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", appointment);
        assert_eq!(appointment["status"], "pending");
        assert_eq!(appointment["notes"], "first session");
        let appointment_id = appointment["id"].as_str().unwrap().to_string();

        // No chat before confirmation
        let (status, body) = app
            .call(
                "POST",
                "/api/chat/rooms",
                Some(&patient),
                Some(json!({ "counterpart_id": therapist_id })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["details"]["reason"], "chat_locked");

        // Patients cannot confirm their own request
        let status_uri = format!("/api/appointments/{}/status", appointment_id);
        let (status, _) = app
            .call("PUT", &status_uri, Some(&patient), Some(json!({ "status": "confirmed" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .call("PUT", &status_uri, Some(&therapist), Some(json!({ "status": "confirmed" })))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["status"], "confirmed");
        assert_eq!(body["counterpart"]["id"], patient_id.as_str());

        // Confirming twice is a conflict
        let (status, _) = app
            .call("PUT", &status_uri, Some(&therapist), Some(json!({ "status": "confirmed" })))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, room) = app
            .call(
                "POST",
                "/api/chat/rooms",
                Some(&patient),
                Some(json!({ "counterpart_id": therapist_id })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", room);
        let room_id = room["id"].as_str().unwrap().to_string();

        // The therapist opening from the other side lands in the same room
        let (_, same_room) = app
            .call(
                "POST",
                "/api/chat/rooms",
                Some(&therapist),
                Some(json!({ "counterpart_id": patient_id })),
            )
            .await;
        assert_eq!(same_room["id"], room_id.as_str());

        let messages_uri = format!("/api/chat/rooms/{}/messages", room_id);
        let (status, _) = app
            .call("POST", &messages_uri, Some(&patient), Some(json!({ "content": "Hello doctor" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, rooms) = app.call("GET", "/api/chat/rooms", Some(&therapist), None).await;
        assert_eq!(rooms[0]["unread_count"], 1);
        assert_eq!(rooms[0]["last_message"]["content"], "Hello doctor");
        assert_eq!(rooms[0]["counterpart"]["id"], patient_id.as_str());

        let (status, messages) = app.call("GET", &messages_uri, Some(&therapist), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(messages.as_array().unwrap().len(), 1);
        let (_, rooms) = app.call("GET", "/api/chat/rooms", Some(&therapist), None).await;
        assert_eq!(rooms[0]["unread_count"], 0);

        // Admins cannot read private chats
        let (status, _) = app.call("GET", &messages_uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .call("PUT", &status_uri, Some(&therapist), Some(json!({ "status": "completed" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");

        // Completion locks the room again
        let (status, _) = app.call("GET", &messages_uri, Some(&patient), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (_, rooms) = app.call("GET", "/api/chat/rooms", Some(&patient), None).await;
        assert_eq!(rooms.as_array().unwrap().len(), 0);

        let ratings_uri = format!("/api/therapists/{}/ratings", therapist_id);
        let (status, rating) = app
            .call(
                "POST",
                &ratings_uri,
                Some(&patient),
                Some(json!({ "rating": 4, "comment": "  helpful  ", "appointment_id": appointment_id })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", rating);
        assert_eq!(rating["comment"], "helpful");

        let (status, _) = app
            .call(
                "POST",
                &ratings_uri,
                Some(&patient),
                Some(json!({ "rating": 2, "appointment_id": appointment_id })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, list) = app.call("GET", &ratings_uri, Some(&therapist), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total_ratings"], 1);
        assert_eq!(list["average_rating"], 2.0);
        assert_eq!(list["ratings"][0]["patient_name"], "Amina Patient");

        let (_, stats) = app.call("GET", "/api/admin/stats", Some(&admin), None).await;
        assert_eq!(stats["verified_therapists"], 1);
        assert_eq!(stats["total_patients"], 1);
        assert_eq!(stats["total_appointments"], 1);

        let (status, logs) = app
            .call("GET", "/api/admin/audit-logs?action=appointment.confirm", Some(&admin), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(logs["total"], 1);

        let (status, _) = app.call("GET", "/api/admin/audit-logs", Some(&patient), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_rating_requires_completed_appointment() {
        let app = test_app().await;
        let (patient, _, _, therapist_id, _) = verified_pair(&app).await;
        let (_, appointment) = app
            .call(
                "POST",
                "/api/appointments",
                Some(&patient),
                Some(json!({ "therapist_id": therapist_id, "requested_date": future_date() })),
            )
            .await;

        let (status, body) = app
            .call(
                "POST",
                &format!("/api/therapists/{}/ratings", therapist_id),
                Some(&patient),
                Some(json!({ "rating": 5, "appointment_id": appointment["id"] })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["details"]["appointment_id"].is_array());

        let (_, list) = app
            .call("GET", &format!("/api/therapists/{}/ratings", therapist_id), Some(&patient), None)
            .await;
        assert_eq!(list["total_ratings"], 0);
        assert_eq!(list["average_rating"], 0.0);
    }

    #[tokio::test]
    async fn test_feed_posts_likes_and_comments() {
        let app = test_app().await;
        let (patient, _) = app.signup(patient_signup("pat@example.com")).await;
        let (other, _) = app.signup(patient_signup("other@example.com")).await;
        let admin = app.login("admin@example.com", "admin-secret").await;

        let (status, _) = app
            .call("POST", "/api/posts", Some(&patient), Some(json!({ "content": "   " })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, post) = app
            .call("POST", "/api/posts", Some(&patient), Some(json!({ "content": "First post" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let post_id = post["id"].as_str().unwrap().to_string();
        let like_uri = format!("/api/posts/{}/like", post_id);

        for _ in 0..2 {
            let (status, body) = app.call("POST", &like_uri, Some(&other), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["like_count"], 1);
        }

        let comments_uri = format!("/api/posts/{}/comments", post_id);
        app.call("POST", &comments_uri, Some(&other), Some(json!({ "content": "first" })))
            .await;
        app.call("POST", &comments_uri, Some(&patient), Some(json!({ "content": "second" })))
            .await;
        let (_, comments) = app.call("GET", &comments_uri, Some(&patient), None).await;
        assert_eq!(comments[0]["content"], "first");
        assert_eq!(comments[1]["content"], "second");

        let (_, feed) = app.call("GET", "/api/posts", Some(&other), None).await;
        assert_eq!(feed[0]["like_count"], 1);
        assert_eq!(feed[0]["comment_count"], 2);
        assert_eq!(feed[0]["liked_by_me"], true);
        assert_eq!(feed[0]["author"]["full_name"], "Amina Patient");

        let (_, body) = app.call("DELETE", &like_uri, Some(&other), None).await;
        assert_eq!(body["liked"], false);
        assert_eq!(body["like_count"], 0);

        let post_uri = format!("/api/posts/{}", post_id);
        let (status, _) = app
            .call("PUT", &post_uri, Some(&other), Some(json!({ "content": "hijack" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = app.call("DELETE", &post_uri, Some(&other), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, edited) = app
            .call("PUT", &post_uri, Some(&patient), Some(json!({ "content": "Edited" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["content"], "Edited");

        let (status, _) = app.call("DELETE", &post_uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, feed) = app.call("GET", "/api/posts", Some(&patient), None).await;
        assert_eq!(feed.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_failed_feed_writes_leave_state_unchanged() {
        let app = test_app().await;
        let (author, _) = app.signup(patient_signup("pat@example.com")).await;
        let (reader, _) = app.signup(patient_signup("reader@example.com")).await;

        let (_, kept) = app
            .call("POST", "/api/posts", Some(&author), Some(json!({ "content": "Kept" })))
            .await;
        let (_, removed) = app
            .call("POST", "/api/posts", Some(&author), Some(json!({ "content": "Removed" })))
            .await;
        let kept_id = kept["id"].as_str().unwrap().to_string();
        let removed_id = removed["id"].as_str().unwrap().to_string();

        app.call("POST", &format!("/api/posts/{}/like", kept_id), Some(&reader), None)
            .await;
        app.call(
            "POST",
            &format!("/api/posts/{}/comments", kept_id),
            Some(&reader),
            Some(json!({ "content": "nice" })),
        )
        .await;
        let (status, _) = app
            .call("DELETE", &format!("/api/posts/{}", removed_id), Some(&author), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (likes, comments) = (app.count("likes").await, app.count("comments").await);

        let (status, _) = app
            .call("POST", &format!("/api/posts/{}/like", removed_id), Some(&reader), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .call(
                "POST",
                &format!("/api/posts/{}/comments", removed_id),
                Some(&reader),
                Some(json!({ "content": "too late" })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = app
            .call(
                "POST",
                &format!("/api/posts/{}/comments", kept_id),
                Some(&reader),
                Some(json!({ "content": "x".repeat(5000) })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // A post deleted between the existence check and the insert is
        // rejected by the foreign key
        let now = crate::db::now();
        let raced = sqlx::query("INSERT OR IGNORE INTO likes (post_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&removed_id)
            .bind("nobody")
            .bind(&now)
            .execute(&app.state.db)
            .await;
        assert!(raced.is_err());

        assert_eq!(app.count("likes").await, likes);
        assert_eq!(app.count("comments").await, comments);
        let (_, feed) = app.call("GET", "/api/posts", Some(&reader), None).await;
        assert_eq!(feed.as_array().unwrap().len(), 1);
        assert_eq!(feed[0]["like_count"], 1);
        assert_eq!(feed[0]["comment_count"], 1);
    }

    #[tokio::test]
    async fn test_uploads_follow_verification() {
        let app = test_app().await;
        let (pending, pending_id) = app.signup(therapist_signup("pending@example.com")).await;
        let (patient, _) = app.signup(patient_signup("pat@example.com")).await;
        let png = b"\x89PNG\r\n\x1a\nfake image bytes";

        let (status, body) = app
            .upload("/api/profiles/me/avatar", &pending, "me.png", png)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", body);

        let (status, body) = app
            .upload("/api/profiles/me/certificate", &pending, "license.pdf", b"%PDF-1.4 license")
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["id"], pending_id.as_str());
        let certificate_url = body["certificate_url"].as_str().unwrap();
        assert!(certificate_url.ends_with(".pdf"));

        let (status, body) = app
            .upload("/api/profiles/me/avatar", &patient, "me.png", png)
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        let avatar_url = body["avatar_url"].as_str().unwrap().to_string();
        assert!(avatar_url.ends_with(".png"));

        let (_, me) = app.call("GET", "/api/auth/me", Some(&patient), None).await;
        assert_eq!(me["profile"]["avatar_url"], avatar_url.as_str());

        let path = &avatar_url[avatar_url.find("/storage/").unwrap()..];
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let served = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&served[..], &png[..]);

        let (status, _) = app
            .upload("/api/profiles/me/avatar", &patient, "notes.txt", b"plain text")
            .await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_profile_redaction() {
        let app = test_app().await;
        let (patient, patient_id) = app.signup(patient_signup("pat@example.com")).await;
        let (stranger, _) = app.signup(patient_signup("stranger@example.com")).await;

        let uri = format!("/api/profiles/{}", patient_id);
        let (_, own) = app.call("GET", &uri, Some(&patient), None).await;
        assert_eq!(own["phone"], "0555123456");

        let (status, other) = app.call("GET", &uri, Some(&stranger), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(other["full_name"], "Amina Patient");
        assert!(other["phone"].is_null());
        assert!(other["allergies"].is_null());
    }

    #[tokio::test]
    async fn test_session_route_resolution() {
        let app = test_app().await;
        let (_, body) = app
            .call("GET", "/api/session/route?path=/patient/Mainpt", None, None)
            .await;
        assert_eq!(body["action"], "redirect");
        assert_eq!(body["to"], "/login");

        let (_, body) = app.call("GET", "/api/session/route?path=/login", None, None).await;
        assert_eq!(body["action"], "allow");

        let (token, _) = app.signup(therapist_signup("doc@example.com")).await;
        let (_, body) = app
            .call("GET", "/api/session/route?path=/", Some(&token), None)
            .await;
        assert_eq!(body["action"], "redirect");
        assert_eq!(body["to"], "/psychologue/Mainps");
    }

    #[tokio::test]
    async fn test_logout_revokes_session() {
        let app = test_app().await;
        let (token, _) = app.signup(patient_signup("pat@example.com")).await;

        let (status, _) = app.call("POST", "/api/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = app.call("GET", "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(app.state.realtime.room_count(), 0);
    }
}
